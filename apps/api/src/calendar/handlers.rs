use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::types::Json as SqlJson;

use crate::calendar::projection;
use crate::errors::{ok, ApiResponse, AppError};
use crate::models::calendar::{
    CalendarEvent, CalendarEventStatus, CalendarEventType, CalendarEventView, EventSource,
    NotifyChannel,
};
use crate::models::position::Position;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub user_id: i64,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub event_type: Option<CalendarEventType>,
    pub status: Option<CalendarEventStatus>,
}

/// GET /api/v1/calendar/events
pub async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<ListEventsQuery>,
) -> Result<Json<ApiResponse<Vec<CalendarEventView>>>, AppError> {
    let events = sqlx::query_as::<_, CalendarEvent>(
        r#"
        SELECT * FROM calendar_events
        WHERE user_id = $1
          AND ($2::date IS NULL OR event_date >= $2)
          AND ($3::date IS NULL OR event_date <= $3)
          AND ($4::calendar_event_type IS NULL OR event_type = $4)
          AND ($5::calendar_event_status IS NULL OR status = $5)
        ORDER BY event_date, id
        "#,
    )
    .bind(q.user_id)
    .bind(q.start)
    .bind(q.end)
    .bind(q.event_type)
    .bind(q.status)
    .fetch_all(&state.pool)
    .await?;

    let today = Utc::now().date_naive();
    let views = events
        .into_iter()
        .map(|e| CalendarEventView::from_event(e, today))
        .collect();
    Ok(ok(views))
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub user_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub event_date: NaiveDate,
    pub event_time: Option<String>,
    pub all_day: Option<bool>,
    pub reminder_enabled: Option<bool>,
    pub reminder_times: Option<Vec<i32>>,
    pub notify_channels: Option<Vec<NotifyChannel>>,
    pub color: Option<String>,
}

fn validate_event_time(event_time: Option<&str>) -> Result<(), AppError> {
    if let Some(t) = event_time {
        NaiveTime::parse_from_str(t, "%H:%M")
            .map_err(|_| AppError::Validation(format!("event_time {t} is not HH:MM")))?;
    }
    Ok(())
}

/// POST /api/v1/calendar/events
///
/// Creates a manual (custom) event. Auto events only come from projection.
pub async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<ApiResponse<CalendarEventView>>, AppError> {
    if req.title.is_empty() {
        return Err(AppError::Validation("title is required".into()));
    }
    validate_event_time(req.event_time.as_deref())?;
    if let Some(times) = &req.reminder_times {
        if times.iter().any(|h| *h <= 0) {
            return Err(AppError::Validation("reminder_times must be positive hours".into()));
        }
    }

    let event_type = CalendarEventType::Custom;
    let event = sqlx::query_as::<_, CalendarEvent>(
        r#"
        INSERT INTO calendar_events
            (user_id, event_type, title, description, event_date, event_time,
             all_day, reminder_enabled, reminder_times, notify_channels,
             status, color, source)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, 'manual')
        RETURNING *
        "#,
    )
    .bind(req.user_id)
    .bind(event_type)
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.event_date)
    .bind(&req.event_time)
    .bind(req.all_day.unwrap_or(true))
    .bind(req.reminder_enabled.unwrap_or(true))
    .bind(SqlJson(
        req.reminder_times
            .unwrap_or_else(|| event_type.default_reminder_times()),
    ))
    .bind(SqlJson(
        req.notify_channels.unwrap_or_else(|| vec![NotifyChannel::Push]),
    ))
    .bind(req.color.unwrap_or_else(|| event_type.default_color().to_string()))
    .fetch_one(&state.pool)
    .await?;

    let today = Utc::now().date_naive();
    Ok(ok(CalendarEventView::from_event(event, today)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<String>,
    pub all_day: Option<bool>,
    pub reminder_enabled: Option<bool>,
    pub reminder_times: Option<Vec<i32>>,
    pub notify_channels: Option<Vec<NotifyChannel>>,
    pub color: Option<String>,
    pub status: Option<CalendarEventStatus>,
}

/// PATCH /api/v1/calendar/events/:id
pub async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<Json<ApiResponse<CalendarEventView>>, AppError> {
    validate_event_time(req.event_time.as_deref())?;

    let event = sqlx::query_as::<_, CalendarEvent>(
        r#"
        UPDATE calendar_events SET
            title = COALESCE($1, title),
            description = COALESCE($2, description),
            event_date = COALESCE($3, event_date),
            event_time = COALESCE($4, event_time),
            all_day = COALESCE($5, all_day),
            reminder_enabled = COALESCE($6, reminder_enabled),
            reminder_times = COALESCE($7, reminder_times),
            notify_channels = COALESCE($8, notify_channels),
            color = COALESCE($9, color),
            status = COALESCE($10, status),
            updated_at = now()
        WHERE id = $11
        RETURNING *
        "#,
    )
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.event_date)
    .bind(&req.event_time)
    .bind(req.all_day)
    .bind(req.reminder_enabled)
    .bind(req.reminder_times.map(SqlJson))
    .bind(req.notify_channels.map(SqlJson))
    .bind(&req.color)
    .bind(req.status)
    .bind(event_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("calendar event {event_id}")))?;

    let today = Utc::now().date_naive();
    Ok(ok(CalendarEventView::from_event(event, today)))
}

/// DELETE /api/v1/calendar/events/:id
///
/// Manual events delete; auto events cancel so the projector does not
/// recreate them on the next reproject.
pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let event = sqlx::query_as::<_, CalendarEvent>(
        "SELECT * FROM calendar_events WHERE id = $1",
    )
    .bind(event_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("calendar event {event_id}")))?;

    match event.source {
        EventSource::Manual => {
            sqlx::query("DELETE FROM calendar_events WHERE id = $1")
                .bind(event_id)
                .execute(&state.pool)
                .await?;
            Ok(ok(json!({ "deleted": true })))
        }
        EventSource::Auto => {
            sqlx::query(
                "UPDATE calendar_events SET status = 'cancelled', updated_at = now() WHERE id = $1",
            )
            .bind(event_id)
            .execute(&state.pool)
            .await?;
            Ok(ok(json!({ "deleted": false, "cancelled": true })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoProjectRequest {
    pub user_id: i64,
    pub position_id: String,
}

/// POST /api/v1/calendar/events/auto
///
/// Projects a position's lifecycle dates into the user's calendar.
pub async fn project_auto_events(
    State(state): State<AppState>,
    Json(req): Json<AutoProjectRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let position = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE position_id = $1",
    )
    .bind(&req.position_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("position {}", req.position_id)))?;

    let today = Utc::now().date_naive();
    let created = projection::project_for_user(&state.pool, req.user_id, &position, today).await?;
    Ok(ok(json!({ "events_created": created })))
}
