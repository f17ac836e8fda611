//! # Web API Error Types
//!
//! HTTP mapping of pipeline failures. Every error renders as
//! `{"error": {"code": ..., "message": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::PipelineError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Worker authentication failed: {reason}")]
    Unauthorized { reason: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("JSON serialization/deserialization error")]
    JsonError,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_code, message) = match &self {
            ApiError::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.as_str())
            }
            ApiError::NotFound { message } => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message.as_str())
            }
            ApiError::Unauthorized { reason } => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", reason.as_str())
            }
            ApiError::Conflict { message } => (StatusCode::CONFLICT, "CONFLICT", message.as_str()),
            ApiError::JsonError => (StatusCode::BAD_REQUEST, "JSON_ERROR", "Invalid JSON format"),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            ),
        };

        let error_response = json!({
            "error": {
                "code": error_code,
                "message": message
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(message) => ApiError::BadRequest { message },
            PipelineError::DataNotFound(message) => ApiError::NotFound { message },
            PipelineError::Unauthorized(reason) => ApiError::Unauthorized { reason },
            err @ PipelineError::WorkspaceLocked { .. } => ApiError::Conflict {
                message: err.to_string(),
            },
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(_: serde_json::Error) -> Self {
        ApiError::JsonError
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
