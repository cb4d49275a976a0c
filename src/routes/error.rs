use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::coordinator::CoordinatorError;

/// Error type for HTTP handlers.
///
/// Produces a JSON body `{ "error": ..., "code": ... }`. Infrastructure
/// failures are logged and answered with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Coordinator(CoordinatorError::Validation(message.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Coordinator(err) => match err {
                CoordinatorError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoordinatorError::PayloadTooLarge { .. } => (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "PAYLOAD_TOO_LARGE",
                    err.to_string(),
                ),
                CoordinatorError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                CoordinatorError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoordinatorError::Dispatch(_) => {
                    tracing::error!(error = %err, "Dispatch error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DISPATCH_ERROR",
                        "Failed to schedule processing".to_string(),
                    )
                }
                CoordinatorError::Queue(_) | CoordinatorError::Storage(_) => {
                    tracing::error!(error = %err, "Internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            ApiError::Multipart(err) => {
                let status = err.status();
                let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "PAYLOAD_TOO_LARGE"
                } else {
                    "INVALID_MULTIPART"
                };
                (status, code, err.body_text())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
