//! Session management handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::api::ApiError;
use crate::models::{
    EndSessionResponse, SessionInfo, StartSessionRequest, StartSessionResponse, StepResponse,
};
use crate::scenario::Scenario;
use crate::AppState;

/// Start a session with the scenario from the body, or the configured
/// scenario file when the body has none
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    request: Option<Json<StartSessionRequest>>,
) -> Result<(StatusCode, Json<StartSessionResponse>), ApiError> {
    let scenario = match request.and_then(|Json(req)| req.scenario) {
        Some(scenario) => {
            if scenario.name.trim().is_empty() {
                return Err(ApiError::BadRequest("Scenario name cannot be empty".into()));
            }
            scenario
        }
        None => Scenario::load(&state.config.scenario_path).await?,
    };

    let started = state.session_manager.start_session(scenario).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: started.session_id,
            message: "Session started".to_string(),
            name: started.name,
        }),
    ))
}

/// List live sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.session_manager.list_sessions().await)
}

/// Get session info
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    Ok(Json(state.session_manager.session_info(&session_id).await?))
}

/// End a session and release its sandbox
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    state.session_manager.end_session(&session_id).await?;
    info!(session_id = %session_id, "Session ended via API");

    Ok(Json(EndSessionResponse {
        message: "Session ended".to_string(),
    }))
}

/// Advance the session to its next scenario step
pub async fn advance_step(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<StepResponse>, ApiError> {
    Ok(Json(state.session_manager.advance_step(&session_id).await?))
}
