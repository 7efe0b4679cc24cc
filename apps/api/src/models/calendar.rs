use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Lifecycle stage an event is derived from, or `Custom` for user-created
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "calendar_event_type", rename_all = "snake_case")]
pub enum CalendarEventType {
    RegistrationStart,
    RegistrationEnd,
    WrittenExam,
    Interview,
    Custom,
}

impl CalendarEventType {
    pub fn display_name(&self) -> &'static str {
        match self {
            CalendarEventType::RegistrationStart => "报名开始",
            CalendarEventType::RegistrationEnd => "报名截止",
            CalendarEventType::WrittenExam => "笔试",
            CalendarEventType::Interview => "面试",
            CalendarEventType::Custom => "自定义",
        }
    }

    pub fn default_color(&self) -> &'static str {
        match self {
            CalendarEventType::RegistrationStart => "#22c55e",
            CalendarEventType::RegistrationEnd => "#ef4444",
            CalendarEventType::WrittenExam => "#3b82f6",
            CalendarEventType::Interview => "#ec4899",
            CalendarEventType::Custom => "#6b7280",
        }
    }

    /// Default hours-before reminders for auto-derived events. Deadlines
    /// and exams get a longer lead-in than the registration opening.
    pub fn default_reminder_times(&self) -> Vec<i32> {
        match self {
            CalendarEventType::RegistrationStart => vec![24, 2],
            CalendarEventType::RegistrationEnd => vec![72, 24, 2],
            CalendarEventType::WrittenExam | CalendarEventType::Interview => vec![168, 72, 24],
            CalendarEventType::Custom => vec![24, 2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "calendar_event_status", rename_all = "snake_case")]
pub enum CalendarEventStatus {
    Pending,
    Notified,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "event_source", rename_all = "snake_case")]
pub enum EventSource {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyChannel {
    Push,
    Email,
    Sms,
    InApp,
}

impl NotifyChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyChannel::Push => "push",
            NotifyChannel::Email => "email",
            NotifyChannel::Sms => "sms",
            NotifyChannel::InApp => "in_app",
        }
    }
}

/// A dated, user-owned calendar item. At most one row exists per
/// (user, position, event_type) with `source = auto`; manual events belong
/// to the user only and are never touched by the projector.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CalendarEvent {
    pub id: i64,
    pub user_id: i64,
    pub position_id: Option<String>,
    pub announcement_id: Option<i64>,
    pub event_type: CalendarEventType,
    pub title: String,
    pub description: String,
    pub event_date: NaiveDate,
    /// HH:MM; None for all-day events.
    pub event_time: Option<String>,
    pub all_day: bool,
    pub reminder_enabled: bool,
    pub reminder_times: Json<Vec<i32>>,
    pub notify_channels: Json<Vec<NotifyChannel>>,
    pub status: CalendarEventStatus,
    pub color: String,
    pub source: EventSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    /// Whole days between today and the event date. Negative when past.
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.event_date - today).num_days()
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.days_remaining(today) < 0
    }
}

/// Event projection enriched with derived fields for API responses.
/// `days_remaining` is always derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEventView {
    #[serde(flatten)]
    pub event: CalendarEvent,
    pub event_type_name: &'static str,
    pub days_remaining: i64,
    pub is_overdue: bool,
}

impl CalendarEventView {
    pub fn from_event(event: CalendarEvent, today: NaiveDate) -> Self {
        let days_remaining = event.days_remaining(today);
        CalendarEventView {
            event_type_name: event.event_type.display_name(),
            days_remaining,
            is_overdue: days_remaining < 0,
            event,
        }
    }
}

/// Append-only record of a delivered reminder or system message.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub event_id: Option<i64>,
    pub channel: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
