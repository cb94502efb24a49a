//! Data models for the storebox orchestrator
//!
//! This module defines the request/response types of the HTTP surface and
//! the session summaries returned by the session manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::scenario::Scenario;
use crate::store::{CommandReply, ExecutionMode};

// ============================================================================
// Session Models
// ============================================================================

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Start session request. The configured scenario file is used when the
/// body carries no scenario.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StartSessionRequest {
    #[serde(default)]
    pub scenario: Option<Scenario>,
}

/// Start session response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub message: String,
    pub name: String,
}

/// End session response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub message: String,
}

/// Session summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub name: String,
    pub status: SessionStatus,
    pub container_id: String,
    pub container_name: String,
    pub host_port: u16,
    pub connected: bool,
    pub step: u64,
    pub total_steps: usize,
    pub command_count: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Result of advancing a session's step counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub session_id: Uuid,
    pub step: u64,
    pub total_steps: usize,
    /// Descriptor of the step now current, absent past the last step
    #[serde(default)]
    pub current: Option<Value>,
}

// ============================================================================
// Command Models
// ============================================================================

/// Request to run a store command in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandRequest {
    pub command: String,

    /// Arguments in order. Scalars are accepted and sent as their text form.
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,
}

/// Command result
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCommandResponse {
    pub result: CommandReply,
}

fn deserialize_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    raw.into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "command arguments must be strings, numbers or booleans, got {}",
                other
            ))),
        })
        .collect()
}

// ============================================================================
// Health Models
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: u64,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub engine_version: Option<String>,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

// ============================================================================
// Error Models
// ============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Error reply for a command the store itself rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreErrorResponse {
    pub error: String,
    pub command: String,
    pub args: Vec<String>,
}
