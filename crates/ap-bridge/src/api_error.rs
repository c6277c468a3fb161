//! HTTP API error type.
//!
//! Session errors are mapped onto status codes here so handlers can use `?`
//! and callers get a consistent `{"error": "..."}` body.

use ap_session::SessionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A session-layer failure, rendered with the session error's own message.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Session(e) => match e {
                SessionError::NoActiveSession => StatusCode::CONFLICT,
                SessionError::ProcessExited { .. } => StatusCode::GONE,
                SessionError::AtCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::SpawnFailed(_) | SessionError::ResizeFailed(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg.clone(),
            ApiError::Session(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(%status, "{message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
