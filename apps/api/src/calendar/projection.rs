//! Projection of position lifecycle dates into per-user calendar events.
//!
//! Derivation is pure; persistence is idempotent through the partial unique
//! index on (user_id, position_id, event_type) for auto events. Manual
//! events are invisible to the projector.

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::models::calendar::{CalendarEvent, CalendarEventType};
use crate::models::position::Position;

/// An event the projector wants to exist, before reconciliation with what
/// is already stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedEvent {
    pub event_type: CalendarEventType,
    pub title: String,
    pub description: String,
    pub event_date: NaiveDate,
}

/// Derives the auto events a position's dates imply. Absent dates derive
/// nothing.
pub fn derive_auto_events(position: &Position) -> Vec<DerivedEvent> {
    let candidates = [
        (CalendarEventType::RegistrationStart, position.registration_start),
        (CalendarEventType::RegistrationEnd, position.registration_end),
        (CalendarEventType::WrittenExam, position.exam_date),
        (CalendarEventType::Interview, position.interview_date),
    ];
    candidates
        .into_iter()
        .filter_map(|(event_type, date)| {
            date.map(|event_date| DerivedEvent {
                event_type,
                title: format!("{} - {}", event_type.display_name(), position.position_name),
                description: format!("{} | {}", position.department_name, position.position_name),
                event_date,
            })
        })
        .collect()
}

/// Reconciliation plan between stored auto events and a fresh derivation.
#[derive(Debug, Default)]
pub struct ProjectionDiff {
    pub create: Vec<DerivedEvent>,
    /// (event id, new title, new date) for events whose date moved.
    /// Customizations (reminders, color, channels) are untouched.
    pub update: Vec<(i64, String, NaiveDate)>,
    /// Event ids whose source date disappeared from the position.
    pub cancel: Vec<i64>,
}

impl ProjectionDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.cancel.is_empty()
    }
}

/// Computes the changes needed to make `existing` (one user's stored auto
/// events for the position) match `derived`.
pub fn diff_projection(existing: &[CalendarEvent], derived: &[DerivedEvent]) -> ProjectionDiff {
    let mut diff = ProjectionDiff::default();

    for want in derived {
        match existing.iter().find(|e| e.event_type == want.event_type) {
            None => diff.create.push(want.clone()),
            Some(have) => {
                if have.event_date != want.event_date || have.title != want.title {
                    diff.update.push((have.id, want.title.clone(), want.event_date));
                }
            }
        }
    }
    for have in existing {
        if !derived.iter().any(|w| w.event_type == have.event_type) {
            diff.cancel.push(have.id);
        }
    }
    diff
}

async fn insert_auto_event(
    pool: &PgPool,
    user_id: i64,
    position_id: &str,
    event: &DerivedEvent,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO calendar_events
            (user_id, position_id, event_type, title, description, event_date,
             all_day, reminder_enabled, reminder_times, notify_channels,
             status, color, source)
        VALUES ($1, $2, $3, $4, $5, $6, true, true, $7, '["push"]'::jsonb,
                'pending', $8, 'auto')
        ON CONFLICT (user_id, position_id, event_type) WHERE source = 'auto'
        DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(position_id)
    .bind(event.event_type)
    .bind(&event.title)
    .bind(&event.description)
    .bind(event.event_date)
    .bind(sqlx::types::Json(event.event_type.default_reminder_times()))
    .bind(event.event_type.default_color())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Creates the auto events for one user and position, typically when the
/// user favorites the position. Past dates are not projected; re-projection
/// of an already projected pair is a no-op.
pub async fn project_for_user(
    pool: &PgPool,
    user_id: i64,
    position: &Position,
    today: NaiveDate,
) -> Result<u64, AppError> {
    let mut created = 0;
    for event in derive_auto_events(position) {
        if event.event_date < today {
            continue;
        }
        created += insert_auto_event(pool, user_id, &position.position_id, &event).await?;
    }
    debug!(
        "projected {created} events for user {user_id} position {}",
        position.position_id
    );
    Ok(created)
}

async fn load_auto_events(
    pool: &PgPool,
    user_id: i64,
    position_id: &str,
) -> Result<Vec<CalendarEvent>, AppError> {
    let events = sqlx::query_as::<_, CalendarEvent>(
        r#"
        SELECT * FROM calendar_events
        WHERE user_id = $1 AND position_id = $2 AND source = 'auto'
          AND status <> 'cancelled'
        "#,
    )
    .bind(user_id)
    .bind(position_id)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

/// Reconciles every affected user's auto events after a position's dates
/// changed. Date moves keep user customizations; vanished dates cancel the
/// event rather than deleting it.
pub async fn reproject_position(pool: &PgPool, position: &Position) -> Result<(), AppError> {
    let user_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM calendar_events WHERE position_id = $1 AND source = 'auto'",
    )
    .bind(&position.position_id)
    .fetch_all(pool)
    .await?;

    let derived = derive_auto_events(position);
    for user_id in user_ids {
        let existing = load_auto_events(pool, user_id, &position.position_id).await?;
        let diff = diff_projection(&existing, &derived);
        if diff.is_empty() {
            continue;
        }

        let today = Utc::now().date_naive();
        for event in &diff.create {
            if event.event_date < today {
                continue;
            }
            insert_auto_event(pool, user_id, &position.position_id, event).await?;
        }
        for (event_id, title, date) in &diff.update {
            // A moved date reopens the reminder window.
            sqlx::query(
                r#"
                UPDATE calendar_events SET
                    title = $1, event_date = $2, status = 'pending', updated_at = now()
                WHERE id = $3
                "#,
            )
            .bind(title)
            .bind(date)
            .bind(event_id)
            .execute(pool)
            .await?;
        }
        for event_id in &diff.cancel {
            sqlx::query(
                "UPDATE calendar_events SET status = 'cancelled', updated_at = now() WHERE id = $1",
            )
            .bind(event_id)
            .execute(pool)
            .await?;
        }
        info!(
            "reprojected position {} for user {user_id}: +{} ~{} -{}",
            position.position_id,
            diff.create.len(),
            diff.update.len(),
            diff.cancel.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::calendar::{CalendarEventStatus, EventSource, NotifyChannel};
    use crate::models::position::PositionStatus;
    use chrono::Utc;
    use sqlx::types::Json;

    fn position() -> Position {
        Position {
            id: 1,
            position_id: "gd-2025-001".to_string(),
            position_name: "综合管理岗".to_string(),
            department_name: "广州市税务局".to_string(),
            department_level: "市级".to_string(),
            recruit_count: 1,
            education: String::new(),
            degree: String::new(),
            major_list: Json(vec![]),
            major_categories: Json(vec![]),
            is_unlimited_major: true,
            political_status: String::new(),
            age_min: None,
            age_max: None,
            work_experience_years: 0,
            is_for_fresh_graduate: None,
            gender: String::new(),
            hukou_provinces: Json(vec![]),
            province: "440000".to_string(),
            city: "440100".to_string(),
            exam_type: "省考".to_string(),
            registration_start: Some(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()),
            registration_end: Some(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()),
            exam_date: Some(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()),
            interview_date: None,
            source_url: String::new(),
            status: PositionStatus::Published,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn stored(event_type: CalendarEventType, date: NaiveDate, title: &str) -> CalendarEvent {
        CalendarEvent {
            id: event_type as i64 + 100,
            user_id: 1,
            position_id: Some("gd-2025-001".to_string()),
            announcement_id: None,
            event_type,
            title: title.to_string(),
            description: String::new(),
            event_date: date,
            event_time: None,
            all_day: true,
            reminder_enabled: true,
            reminder_times: Json(event_type.default_reminder_times()),
            notify_channels: Json(vec![NotifyChannel::InApp]),
            status: CalendarEventStatus::Pending,
            color: event_type.default_color().to_string(),
            source: EventSource::Auto,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_derivation_skips_absent_dates() {
        let events = derive_auto_events(&position());
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                CalendarEventType::RegistrationStart,
                CalendarEventType::RegistrationEnd,
                CalendarEventType::WrittenExam,
            ]
        );
        assert_eq!(events[2].title, "笔试 - 综合管理岗");
    }

    #[test]
    fn test_diff_creates_everything_for_new_projection() {
        let derived = derive_auto_events(&position());
        let diff = diff_projection(&[], &derived);
        assert_eq!(diff.create.len(), 3);
        assert!(diff.update.is_empty());
        assert!(diff.cancel.is_empty());
    }

    #[test]
    fn test_diff_moves_date_and_creates_new_event() {
        // Stored state: exam on the old date, no interview yet.
        let existing = vec![
            stored(
                CalendarEventType::RegistrationStart,
                NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                "报名开始 - 综合管理岗",
            ),
            stored(
                CalendarEventType::RegistrationEnd,
                NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
                "报名截止 - 综合管理岗",
            ),
            stored(
                CalendarEventType::WrittenExam,
                NaiveDate::from_ymd_opt(2025, 3, 8).unwrap(),
                "笔试 - 综合管理岗",
            ),
        ];
        let mut p = position();
        p.interview_date = Some(NaiveDate::from_ymd_opt(2025, 4, 20).unwrap());
        let diff = diff_projection(&existing, &derive_auto_events(&p));

        assert_eq!(diff.create.len(), 1);
        assert_eq!(diff.create[0].event_type, CalendarEventType::Interview);
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.update[0].2, NaiveDate::from_ymd_opt(2025, 3, 15).unwrap());
        assert!(diff.cancel.is_empty());
    }

    #[test]
    fn test_diff_cancels_event_whose_date_vanished() {
        let existing = vec![stored(
            CalendarEventType::WrittenExam,
            NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            "笔试 - 综合管理岗",
        )];
        let mut p = position();
        p.registration_start = None;
        p.registration_end = None;
        p.exam_date = None;
        let diff = diff_projection(&existing, &derive_auto_events(&p));
        assert_eq!(diff.cancel, vec![existing[0].id]);
        assert!(diff.create.is_empty());
    }

    #[test]
    fn test_diff_unchanged_projection_is_empty() {
        let p = position();
        let derived = derive_auto_events(&p);
        let existing: Vec<_> = derived
            .iter()
            .map(|d| stored(d.event_type, d.event_date, &d.title))
            .collect();
        assert!(diff_projection(&existing, &derived).is_empty());
    }
}
