//! Error surface for the plain HTTP routes.
//!
//! The voice path has its own taxonomy in `session_error`; this type only
//! covers the JSON endpoints, where every failure collapses to a 500 with a
//! uniform body and the detail goes to the log, not the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
#[error("Internal error: {0}")]
pub struct AppError(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("HTTP handler failed: {}", self.0);
        let body = Json(json!({
            "error": "Internal server error",
            "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16()
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError(format!("serialization failed: {err}"))
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
