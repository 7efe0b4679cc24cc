use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// The taxonomy mirrors how failures propagate: validation and not-found are
/// user-visible and never retried; conflicts are reconciled locally (callers
/// usually never see this variant); transient-remote failures are retried by
/// the parse runner before escalating to permanent-remote.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    #[error("Permanent remote error: {0}")]
    PermanentRemote(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable numeric code for the response envelope.
    /// Codes are partitioned by kind: 1xxx validation, 2xxx not-found,
    /// 3xxx conflict, 4xxx remote, 5xxx internal.
    pub fn code(&self) -> i32 {
        match self {
            AppError::Validation(_) => 1001,
            AppError::NotFound(_) => 2001,
            AppError::Conflict(_) => 3001,
            AppError::TransientRemote(_) => 4001,
            AppError::PermanentRemote(_) => 4002,
            AppError::Llm(_) => 4003,
            AppError::Database(_) => 5001,
            AppError::Internal(_) => 5000,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::TransientRemote(msg) | AppError::PermanentRemote(msg) => {
                tracing::warn!("Remote error: {msg}");
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "An AI processing error occurred".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "code": self.code(),
            "message": message,
            "data": null,
        }));

        (status, body).into_response()
    }
}

/// Uniform success envelope: `{code: 0, message: "ok", data: …}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

/// Wraps handler output in the success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        message: "ok".to_string(),
        data,
    })
}
