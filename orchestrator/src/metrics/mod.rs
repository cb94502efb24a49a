//! Prometheus metrics export
//!
//! Provides metrics endpoint for monitoring and alerting

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::AppState;

/// Prometheus metrics recorder
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init_metrics() -> Result<()> {
    METRICS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("storebox_command_duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .context("Invalid histogram buckets")?
            .install_recorder()
            .context("Failed to install metrics recorder")
    })?;
    Ok(())
}

/// Record a session that came up
pub fn record_session_started() {
    counter!("storebox_sessions_started_total").increment(1);
    gauge!("storebox_active_sessions").increment(1.0);
}

/// Record a session that was ended
pub fn record_session_ended(clean: bool) {
    let outcome = if clean { "clean" } else { "teardown_error" };
    counter!("storebox_sessions_ended_total", "outcome" => outcome).increment(1);
    gauge!("storebox_active_sessions").decrement(1.0);
}

/// Record a session that failed to start, by the stage that failed
pub fn record_session_failed(stage: &'static str) {
    counter!("storebox_sessions_failed_total", "stage" => stage).increment(1);
}

/// Record a command
pub fn record_command(mode: &'static str, outcome: &'static str, duration_secs: f64) {
    counter!("storebox_commands_total", "mode" => mode, "outcome" => outcome).increment(1);
    histogram!("storebox_command_duration_seconds", "mode" => mode).record(duration_secs);
}

/// Record a retry after a dead connection
pub fn record_reconnect() {
    counter!("storebox_reconnects_total").increment(1);
}

/// Record a container restarted after being found stopped
pub fn record_container_restart() {
    counter!("storebox_container_restarts_total").increment(1);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.session_manager.active_session_count().await;
    gauge!("storebox_active_sessions").set(active as f64);

    let metrics = METRICS_HANDLE.get().map(|h| h.render()).unwrap_or_default();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
}
