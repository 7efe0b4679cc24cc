pub mod health;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::state::AppState;
use crate::{calendar, ingestion, matching, positions};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Positions
        .route("/api/v1/positions", get(positions::handlers::list_positions))
        .route("/api/v1/positions", post(positions::handlers::upsert_position))
        .route(
            "/api/v1/positions/:position_id",
            get(positions::handlers::get_position),
        )
        // Match engine
        .route("/api/v1/match/compute", post(matching::handlers::compute_match))
        .route("/api/v1/match/batch", post(matching::handlers::compute_batch))
        .route(
            "/api/v1/match/cache/stats",
            get(matching::handlers::cache_stats),
        )
        // Ingestion pipeline
        .route(
            "/api/v1/ingestion/records",
            post(ingestion::handlers::discover_records),
        )
        .route("/api/v1/ingestion/tasks", post(ingestion::handlers::create_task))
        .route(
            "/api/v1/ingestion/tasks/:id",
            get(ingestion::handlers::get_task),
        )
        .route(
            "/api/v1/ingestion/tasks/:id/cancel",
            post(ingestion::handlers::cancel_task),
        )
        .route("/api/v1/ingestion/stats", get(ingestion::handlers::stats))
        // Exam calendar
        .route("/api/v1/calendar/events", get(calendar::handlers::list_events))
        .route("/api/v1/calendar/events", post(calendar::handlers::create_event))
        .route(
            "/api/v1/calendar/events/auto",
            post(calendar::handlers::project_auto_events),
        )
        .route(
            "/api/v1/calendar/events/:id",
            patch(calendar::handlers::update_event),
        )
        .route(
            "/api/v1/calendar/events/:id",
            delete(calendar::handlers::delete_event),
        )
        .with_state(state)
}
