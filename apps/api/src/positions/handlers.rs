use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{ok, ApiResponse, AppError};
use crate::matching::engine::MatchResponse;
use crate::models::position::{Position, PositionBrief, PositionUpsert};
use crate::positions::store::{self, PositionFilter};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PositionPage {
    pub items: Vec<PositionBrief>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/v1/positions
pub async fn list_positions(
    State(state): State<AppState>,
    Query(filter): Query<PositionFilter>,
) -> Result<Json<ApiResponse<PositionPage>>, AppError> {
    let (items, total) = store::list(&state.pool, &filter).await?;
    Ok(ok(PositionPage {
        items,
        total,
        page: filter.page,
        page_size: filter.page_size,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PositionDetailQuery {
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PositionDetail {
    #[serde(flatten)]
    pub position: Position,
    /// Present when the caller asked for a match against a user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_result: Option<MatchResponse>,
}

/// GET /api/v1/positions/:position_id
///
/// With `user_id`, embeds the user's match result (read-through cached).
pub async fn get_position(
    State(state): State<AppState>,
    Path(position_id): Path<String>,
    Query(q): Query<PositionDetailQuery>,
) -> Result<Json<ApiResponse<PositionDetail>>, AppError> {
    let position = store::get_by_position_id(&state.pool, &position_id).await?;

    let match_result = match q.user_id {
        Some(user_id) => Some(
            state
                .match_engine
                .compute(user_id, &position_id, None, false)
                .await?,
        ),
        None => None,
    };

    Ok(ok(PositionDetail {
        position,
        match_result,
    }))
}

/// POST /api/v1/positions
///
/// Admin upsert path, same dedup key the parser uses.
pub async fn upsert_position(
    State(state): State<AppState>,
    Json(req): Json<PositionUpsert>,
) -> Result<Json<ApiResponse<Position>>, AppError> {
    let (position, created) = store::upsert(&state.pool, &req).await?;
    if !created {
        crate::matching::cache::invalidate_by_position(&state.pool, &position.position_id).await?;
        crate::calendar::projection::reproject_position(&state.pool, &position).await?;
    }
    Ok(ok(position))
}
