//! API module for the storebox orchestrator
//!
//! Provides REST API endpoints for:
//! - Session lifecycle (start, inspect, step, end)
//! - Store command execution
//! - Health checks and metrics

mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use error::ApiError;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // Prometheus metrics
        .route("/metrics", get(crate::metrics::metrics_handler))
        // Routes kept for clients of the first version of the service
        .route("/start-session", post(handlers::session::start_session))
        .route("/execute-command/:session_id", post(handlers::commands::execute_command))
        .route("/end-session/:session_id", post(handlers::session::end_session))
        // API v1 routes
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/sessions",
            get(handlers::session::list_sessions).post(handlers::session::start_session),
        )
        .route(
            "/sessions/:session_id",
            get(handlers::session::get_session).delete(handlers::session::end_session),
        )
        .route(
            "/sessions/:session_id/commands",
            post(handlers::commands::execute_command),
        )
        .route("/sessions/:session_id/step", post(handlers::session::advance_step))
}
