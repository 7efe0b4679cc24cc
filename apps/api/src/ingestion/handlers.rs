use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{ok, ApiResponse, AppError};
use crate::ingestion::queue::{self, DiscoveredRecord, IngestionStats};
use crate::models::ingestion::{ParseTask, ParseTaskStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub records: Vec<DiscoveredRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub record_id: i64,
}

/// POST /api/v1/ingestion/records
pub async fn discover_records(
    State(state): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    if req.records.is_empty() {
        return Err(AppError::Validation("records must not be empty".into()));
    }
    for r in &req.records {
        if r.external_id.is_empty() {
            return Err(AppError::Validation("external_id is required".into()));
        }
    }
    let inserted = queue::discover(&state.pool, &req.records).await?;
    Ok(ok(json!({ "discovered": req.records.len(), "inserted": inserted })))
}

/// POST /api/v1/ingestion/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<ApiResponse<ParseTask>>, AppError> {
    queue::get_record(&state.pool, req.record_id).await?;
    let task = queue::create_task(&state.pool, req.record_id).await?;
    Ok(ok(task))
}

/// GET /api/v1/ingestion/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<ApiResponse<ParseTask>>, AppError> {
    Ok(ok(queue::get_task(&state.pool, task_id).await?))
}

/// POST /api/v1/ingestion/tasks/:id/cancel
///
/// Pending tasks fail immediately; running tasks are flagged and stop at
/// the next step boundary. Terminal tasks conflict.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let task = queue::get_task(&state.pool, task_id).await?;
    if task.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "task {task_id} already finished"
        )));
    }
    if task.status == ParseTaskStatus::Pending {
        let result = sqlx::query(
            "UPDATE parse_tasks SET status = 'failed', message = 'cancelled', updated_at = now() WHERE id = $1 AND status = 'pending'",
        )
        .bind(task_id)
        .execute(&state.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(ok(json!({ "cancelled": true, "was_running": false })));
        }
    }
    let reached = state.cancel_registry.cancel(task_id);
    Ok(ok(json!({ "cancelled": reached, "was_running": true })))
}

/// GET /api/v1/ingestion/stats
pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<IngestionStats>>, AppError> {
    Ok(ok(queue::stats(&state.pool).await?))
}
