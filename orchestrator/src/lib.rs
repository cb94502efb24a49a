//! storebox orchestrator library
//!
//! Provisions disposable, isolated Redis sandboxes on demand and runs store
//! commands against them.

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod scenario;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub session_manager: session::SessionManager,
}
