//! Command execution handler

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::ApiError;
use crate::models::{ExecuteCommandRequest, ExecuteCommandResponse};
use crate::AppState;

/// Run a store command in a session
pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecuteCommandRequest>,
) -> Result<Json<ExecuteCommandResponse>, ApiError> {
    if request.command.trim().is_empty() {
        return Err(ApiError::BadRequest("Command is required".into()));
    }

    let result = state
        .session_manager
        .execute_command(&session_id, &request.command, &request.args)
        .await
        .map_err(|e| ApiError::for_command(e, &request.command, &request.args))?;

    Ok(Json(ExecuteCommandResponse { result }))
}
