//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::error::SandboxError;
use crate::models::{ErrorResponse, StoreErrorResponse};

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The store rejected a command; reported with the command and arguments
    #[error("{message}")]
    Store {
        message: String,
        command: String,
        args: Vec<String>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Attach the command that was being run, so store rejections can be
    /// reported together with it
    pub fn for_command(err: SandboxError, command: &str, args: &[String]) -> Self {
        match err {
            SandboxError::Store(message) => ApiError::Store {
                message,
                command: command.to_string(),
                args: args.to_vec(),
            },
            other => other.into(),
        }
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::NotFound(id) => ApiError::NotFound(format!("Session not found: {}", id)),
            SandboxError::InvalidCommand(_) => ApiError::BadRequest(err.to_string()),
            SandboxError::Store(message) => ApiError::BadRequest(message),
            SandboxError::Conflict(msg) => ApiError::Conflict(msg),
            SandboxError::Provision(_) | SandboxError::Connection(_) => {
                tracing::error!(error = %err, "Sandbox unavailable");
                ApiError::Unavailable(err.to_string())
            }
            SandboxError::Teardown(_) => {
                tracing::error!(error = %err, "Teardown failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Store {
                message,
                command,
                args,
            } => {
                let body = StoreErrorResponse {
                    error: message,
                    command,
                    args,
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(ErrorResponse::new(error_code, message));
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Internal error");
        ApiError::Internal(format!("{:#}", err))
    }
}
