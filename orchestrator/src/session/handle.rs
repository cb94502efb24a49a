//! A single store sandbox session

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::container::ContainerHandle;
use crate::models::{SessionInfo, SessionStatus};
use crate::scenario::Scenario;
use crate::store::ConnectionHandle;

/// Mutable part of a session. Held under the session lock, so commands,
/// heals and teardown on one session never interleave.
#[derive(Debug)]
pub struct SessionState {
    pub status: SessionStatus,
    pub container: ContainerHandle,
    pub connection: ConnectionHandle,
    pub step: u64,
    pub last_activity: DateTime<Utc>,
}

impl SessionState {
    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// A sandbox session: one container, one connection, one scenario
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub id: Uuid,

    /// Scenario attached at creation
    pub scenario: Scenario,

    /// Engine id of the backing container; fixed for the session's lifetime
    pub container_id: String,

    /// Backing container name
    pub container_name: String,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Host port currently published, readable without the session lock
    host_port: AtomicU16,

    /// Commands run
    command_count: AtomicU64,

    /// Commands that failed for infrastructure reasons
    error_count: AtomicU64,

    state: Mutex<SessionState>,
}

pub type SessionHandle = Arc<Session>;

impl Session {
    pub(crate) fn new(
        id: Uuid,
        scenario: Scenario,
        container: ContainerHandle,
        connection: ConnectionHandle,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            scenario,
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            created_at: now,
            host_port: AtomicU16::new(container.host_port),
            command_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                container,
                connection,
                step: 0,
                last_activity: now,
            }),
        }
    }

    /// Take the session lock
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub fn host_port(&self) -> u16 {
        self.host_port.load(Ordering::Relaxed)
    }

    pub(crate) fn set_host_port(&self, port: u16) {
        self.host_port.store(port, Ordering::Relaxed);
    }

    pub fn increment_commands(&self) {
        self.command_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_count(&self) -> u64 {
        self.command_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Summary of the session as seen through `state`
    pub fn info(&self, state: &SessionState) -> SessionInfo {
        SessionInfo {
            session_id: self.id,
            name: self.scenario.name.clone(),
            status: state.status,
            container_id: self.container_id.clone(),
            container_name: self.container_name.clone(),
            host_port: state.container.host_port,
            connected: state.connection.is_open(),
            step: state.step,
            total_steps: self.scenario.steps.len(),
            command_count: self.command_count(),
            error_count: self.error_count(),
            created_at: self.created_at,
            last_activity: state.last_activity,
        }
    }
}
