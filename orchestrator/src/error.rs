//! Error taxonomy for the session lifecycle core

use thiserror::Error;

/// Errors raised by session lifecycle operations.
///
/// `Store` carries a failure reported by the backing store itself and is kept
/// apart from the infrastructure variants so callers can tell a rejected
/// command from a broken sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to provision container: {0}")]
    Provision(String),

    #[error("Failed to connect to store: {0}")]
    Connection(String),

    #[error("Invalid store command: {0}")]
    InvalidCommand(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Store(String),

    #[error("Failed to tear down session: {0}")]
    Teardown(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl SandboxError {
    /// Short machine-readable code used in API responses and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::Provision(_) => "PROVISION_ERROR",
            SandboxError::Connection(_) => "CONNECTION_ERROR",
            SandboxError::InvalidCommand(_) => "INVALID_COMMAND",
            SandboxError::NotFound(_) => "NOT_FOUND",
            SandboxError::Store(_) => "STORE_ERROR",
            SandboxError::Teardown(_) => "TEARDOWN_ERROR",
            SandboxError::Conflict(_) => "CONFLICT",
        }
    }

    /// Whether the failure was caused by the request rather than the infrastructure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SandboxError::InvalidCommand(_) | SandboxError::NotFound(_) | SandboxError::Store(_)
        )
    }
}

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
