//! Error types and response handling for the API server.
//!
//! Lookup failures become client errors; everything the engine reports
//! becomes an internal error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::exec::ExecError;
use crate::log::LogError;
use crate::process::LookupError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicated(String),

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Process not running: {0}")]
    NotRunning(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LookupError::Ambiguous { .. } => ApiError::Duplicated(err.to_string()),
        }
    }
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::AlreadyStarted => ApiError::AlreadyStarted,
            ExecError::InvalidCommand(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    /// Map error variant to appropriate HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Duplicated(_) => StatusCode::CONFLICT,
            ApiError::AlreadyStarted => StatusCode::CONFLICT,
            ApiError::NotRunning(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string for JSON responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Duplicated(_) => "duplicated",
            ApiError::AlreadyStarted => "already_started",
            ApiError::NotRunning(_) => "not_running",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(message) = &self {
            tracing::error!(error = %message, "request failed");
        }
        let body = serde_json::json!({
            "message": self.error_type().replace('_', " "),
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
