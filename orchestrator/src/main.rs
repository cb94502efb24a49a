//! storebox orchestrator - disposable Redis sandboxes on demand
//!
//! This is the main entry point for the storebox orchestrator service.
//! It manages store containers and provides a REST API for running commands
//! against them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use storebox_orchestrator::api::create_router;
use storebox_orchestrator::config::AppConfig;
use storebox_orchestrator::logging::init_logging;
use storebox_orchestrator::session::SessionManager;
use storebox_orchestrator::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        image = %config.store.image,
        execution_mode = config.store.execution_mode.as_str(),
        "Starting storebox orchestrator"
    );

    // Initialize metrics system
    storebox_orchestrator::metrics::init_metrics()?;
    info!("Prometheus metrics initialized");

    // Initialize session manager
    let session_manager = SessionManager::connect(config.store.clone()).await?;

    // Create shared application state
    let state = Arc::new(AppState {
        config: config.clone(),
        session_manager,
    });

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening on");

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");

    if config.drain_on_shutdown {
        let active = state.session_manager.active_session_count().await;
        if active > 0 {
            warn!(active, "Tearing down remaining sessions");
        }
        state.session_manager.shutdown().await;
    }

    info!("storebox orchestrator stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
