use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("invalid {entity} transition from {from} to {requested}; allowed next: [{}]", .allowed.join(", "))]
    InvalidTransition {
        entity: &'static str,
        from: String,
        requested: String,
        allowed: Vec<String>,
    },

    #[error("already assigned: {0}")]
    AlreadyAssigned(String),

    #[error("claim conflict: {0}")]
    ClaimConflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::InvalidCoordinates(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() }))
            }
            AppError::InvalidTransition { allowed, .. } => (
                StatusCode::CONFLICT,
                json!({ "error": self.to_string(), "allowed": allowed }),
            ),
            AppError::AlreadyAssigned(_) | AppError::ClaimConflict(_) => {
                (StatusCode::CONFLICT, json!({ "error": self.to_string() }))
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}
