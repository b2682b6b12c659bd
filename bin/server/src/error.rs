//! Error responses for the trigger API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use billhound_followup::EngineError;
use serde_json::json;

/// Errors surfaced to HTTP callers.
///
/// Per-entity failures never reach this type; they stay inside the batch
/// report counters. What arrives here is a malformed request, a targeted
/// action aimed at the wrong entity or status, or a storage-level fault.
#[derive(Debug)]
pub enum ApiError {
    /// Request body was not parseable or named an unknown action.
    BadRequest { message: String },
    /// Targeted action referenced an entity that does not exist.
    NotFound { message: String },
    /// The engine refused the request without mutating anything.
    InvalidRequest { message: String },
    /// A pass or storage operation failed.
    Internal { message: String },
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::QuoteNotFound { .. } | EngineError::InvoiceNotFound { .. } => {
                Self::NotFound {
                    message: error.to_string(),
                }
            }
            EngineError::InvalidRequest { .. } => Self::InvalidRequest {
                message: error.to_string(),
            },
            EngineError::PassFailed { .. } | EngineError::StorageFailed { .. } => Self::Internal {
                message: error.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            Self::NotFound { message } => (StatusCode::NOT_FOUND, message),
            Self::InvalidRequest { message } => (StatusCode::BAD_REQUEST, message),
            Self::Internal { message } => {
                tracing::error!(error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
