use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::errors::{ok, ApiResponse, AppError};
use crate::matching::engine::MatchResponse;
use crate::models::match_cache::MatchCacheStats;
use crate::models::profile::MatchStrategy;
use crate::state::AppState;

const MAX_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ComputeMatchRequest {
    pub user_id: i64,
    pub position_id: String,
    pub strategy: Option<MatchStrategy>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchMatchRequest {
    pub user_id: i64,
    pub position_ids: Vec<String>,
    pub strategy: Option<MatchStrategy>,
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/match/compute
pub async fn compute_match(
    State(state): State<AppState>,
    Json(req): Json<ComputeMatchRequest>,
) -> Result<Json<ApiResponse<MatchResponse>>, AppError> {
    if req.position_id.is_empty() {
        return Err(AppError::Validation("position_id is required".into()));
    }
    let result = state
        .match_engine
        .compute(req.user_id, &req.position_id, req.strategy, req.force)
        .await?;
    info!(
        "match user={} position={} score={} eligible={}",
        req.user_id, req.position_id, result.match_score, result.is_eligible
    );
    Ok(ok(result))
}

/// POST /api/v1/match/batch
pub async fn compute_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchMatchRequest>,
) -> Result<Json<ApiResponse<Vec<MatchResponse>>>, AppError> {
    if req.position_ids.is_empty() {
        return Err(AppError::Validation("position_ids must not be empty".into()));
    }
    if req.position_ids.len() > MAX_BATCH {
        return Err(AppError::Validation(format!(
            "at most {MAX_BATCH} positions per batch"
        )));
    }
    let results = state
        .match_engine
        .compute_batch(req.user_id, &req.position_ids, req.strategy, req.force)
        .await?;
    Ok(ok(results))
}

/// GET /api/v1/match/cache/stats
pub async fn cache_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MatchCacheStats>>, AppError> {
    Ok(ok(state.match_engine.cache_stats().await?))
}
