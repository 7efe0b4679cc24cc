//! Reminder dispatch: a periodic tick that fires due reminders exactly once.
//!
//! Due-ness is a pure function of the event and the tick window, so a
//! delayed tick catches up instead of skipping reminders. The unique index
//! on reminder_log (event_id, hours_before) makes delivery idempotent even
//! when two instances tick concurrently.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use tracing::{error, info};

use crate::errors::AppError;
use crate::ingestion::runner::CancelFlag;
use crate::models::calendar::CalendarEvent;

/// Start-of-business anchor for all-day events.
const ALL_DAY_HOUR: u32 = 9;

/// The instant an event "happens" for reminder math.
pub fn event_instant(event_date: NaiveDate, event_time: Option<&str>) -> DateTime<Utc> {
    let time = event_time
        .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
        .unwrap_or_else(|| NaiveTime::from_hms_opt(ALL_DAY_HOUR, 0, 0).unwrap());
    event_date.and_time(time).and_utc()
}

/// One reminder to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct DueReminder {
    pub event_id: i64,
    pub user_id: i64,
    pub hours_before: i32,
    pub fire_at: DateTime<Utc>,
}

/// Finds every (event, hours_before) whose fire time falls inside the
/// closed window [last_tick, now]. Disabled or non-pending events never
/// fire; the log dedups boundary overlap between ticks.
pub fn due_reminders(
    events: &[CalendarEvent],
    last_tick: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<DueReminder> {
    let mut due = Vec::new();
    for event in events {
        if !event.reminder_enabled {
            continue;
        }
        let instant = event_instant(event.event_date, event.event_time.as_deref());
        for &hours in event.reminder_times.iter() {
            let fire_at = instant - Duration::hours(hours as i64);
            if fire_at >= last_tick && fire_at <= now {
                due.push(DueReminder {
                    event_id: event.id,
                    user_id: event.user_id,
                    hours_before: hours,
                    fire_at,
                });
            }
        }
    }
    due
}

pub struct ReminderDispatcher {
    pool: PgPool,
}

impl ReminderDispatcher {
    pub fn new(pool: PgPool) -> Self {
        ReminderDispatcher { pool }
    }

    async fn load_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, AppError> {
        // Longest lead-in is 168h, so a bounded date window covers every
        // possibly-due reminder.
        let events = sqlx::query_as::<_, CalendarEvent>(
            r#"
            SELECT * FROM calendar_events
            WHERE status = 'pending' AND reminder_enabled
              AND event_date BETWEEN $1 AND $2
            "#,
        )
        .bind(now.date_naive() - Duration::days(2))
        .bind(now.date_naive() + Duration::days(8))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn deliver(&self, event: &CalendarEvent, reminder: &DueReminder) -> Result<bool, AppError> {
        let logged = sqlx::query(
            r#"
            INSERT INTO reminder_log (event_id, hours_before)
            VALUES ($1, $2)
            ON CONFLICT (event_id, hours_before) DO NOTHING
            "#,
        )
        .bind(reminder.event_id)
        .bind(reminder.hours_before)
        .execute(&self.pool)
        .await?;
        if logged.rows_affected() == 0 {
            return Ok(false);
        }

        let content = format!(
            "{} 将于 {} 开始，距今约{}小时",
            event.title,
            event.event_date.format("%Y-%m-%d"),
            reminder.hours_before
        );
        for channel in event.notify_channels.iter() {
            sqlx::query(
                r#"
                INSERT INTO notifications (user_id, event_id, channel, title, content, source)
                VALUES ($1, $2, $3, '考试提醒', $4, 'reminder')
                "#,
            )
            .bind(event.user_id)
            .bind(event.id)
            .bind(channel.as_str())
            .bind(&content)
            .execute(&self.pool)
            .await?;
        }
        Ok(true)
    }

    /// Processes one tick window. Returns how many reminders fired.
    pub async fn tick(
        &self,
        last_tick: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u32, AppError> {
        let events = self.load_candidates(now).await?;
        let due = due_reminders(&events, last_tick, now);

        let mut fired = 0;
        for reminder in &due {
            let event = events.iter().find(|e| e.id == reminder.event_id).unwrap();
            if self.deliver(event, reminder).await? {
                fired += 1;
                // The last reminder of an event moves it to notified.
                let final_hours = event.reminder_times.iter().copied().min().unwrap_or(0);
                if reminder.hours_before == final_hours {
                    sqlx::query(
                        "UPDATE calendar_events SET status = 'notified', updated_at = now() WHERE id = $1 AND status = 'pending'",
                    )
                    .bind(event.id)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        let completed = self.complete_elapsed(now).await?;
        if fired > 0 || completed > 0 {
            info!("reminder tick: fired {fired}, completed {completed}");
        }
        Ok(fired)
    }

    /// Events a full day past their date are done.
    async fn complete_elapsed(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE calendar_events SET status = 'completed', updated_at = now()
            WHERE status IN ('pending', 'notified') AND event_date < $1
            "#,
        )
        .bind(now.date_naive() - Duration::days(1))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Dispatcher loop. The first window opens at startup time, so reminders
/// that came due while the service was down fire on the first tick only if
/// still inside the window; the log keeps reruns silent.
pub async fn run_dispatcher(
    dispatcher: ReminderDispatcher,
    tick_interval: std::time::Duration,
    shutdown: CancelFlag,
) {
    let mut last_tick = Utc::now() - Duration::seconds(tick_interval.as_secs() as i64);
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        interval.tick().await;
        if shutdown.is_cancelled() {
            info!("reminder dispatcher shutting down");
            return;
        }
        let now = Utc::now();
        match dispatcher.tick(last_tick, now).await {
            Ok(_) => last_tick = now,
            Err(e) => error!("reminder tick failed: {e}"),
        }
    }
}
