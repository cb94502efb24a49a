//! In-memory table of live sessions

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::container::ContainerHandle;
use crate::error::{SandboxError, SandboxResult};
use crate::scenario::Scenario;
use crate::store::ConnectionHandle;

use super::handle::{Session, SessionHandle};

/// A registration that was refused. The resources come back so the caller
/// can release them.
#[derive(Debug)]
pub struct Rejected {
    pub error: SandboxError,
    pub container: ContainerHandle,
    pub connection: ConnectionHandle,
}

/// Live sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session under a fresh id.
    ///
    /// Refused when another live session already holds the same container.
    /// A matching host port is not a clash: the engine only hands out a port
    /// that no running container publishes, so the older session's record is
    /// stale and gets refreshed when that session next heals.
    pub async fn create(
        &self,
        scenario: Scenario,
        container: ContainerHandle,
        connection: ConnectionHandle,
    ) -> Result<SessionHandle, Rejected> {
        let mut sessions = self.sessions.write().await;

        let clash = sessions
            .values()
            .find(|s| s.container_id == container.id)
            .map(|s| s.id);
        if let Some(holder) = clash {
            let error = SandboxError::Conflict(format!(
                "container {} is already held by session {}",
                container.id, holder
            ));
            return Err(Rejected {
                error,
                container,
                connection,
            });
        }

        let id = loop {
            let candidate = Uuid::new_v4();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        if let Some(stale) = sessions.values().find(|s| s.host_port() == container.host_port) {
            debug!(
                session_id = %stale.id,
                host_port = container.host_port,
                "Host port reassigned by the engine, older record is stale"
            );
        }

        let session = Arc::new(Session::new(id, scenario, container, connection));
        sessions.insert(id, session.clone());
        debug!(session_id = %id, total = sessions.len(), "Session registered");

        Ok(session)
    }

    pub async fn get(&self, id: &Uuid) -> SandboxResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))
    }

    /// Remove a session; removing an absent id is a no-op
    pub async fn delete(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    pub async fn list(&self) -> Vec<SessionHandle> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove and return every session
    pub async fn drain(&self) -> Vec<SessionHandle> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }
}
