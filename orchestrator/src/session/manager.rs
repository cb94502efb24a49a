//! Session lifecycle management

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::container::{ContainerHandle, ContainerRuntime, DockerRuntime, Provisioner};
use crate::error::{SandboxError, SandboxResult};
use crate::metrics;
use crate::models::{SessionInfo, SessionStatus, StepResponse};
use crate::scenario::Scenario;
use crate::store::{
    CommandExecutor, CommandReply, ConnectionManager, Endpoint, ExecutionMode, PreparedCommand,
    RedisConnector, StoreConnector,
};

use super::registry::{Rejected, SessionRegistry};
use super::handle::{Session, SessionHandle, SessionState};

/// A session that came up
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: Uuid,
    pub name: String,
    pub host_port: u16,
}

/// Creates sessions, runs their commands and tears them down
pub struct SessionManager {
    store: StoreConfig,
    registry: SessionRegistry,
    provisioner: Provisioner,
    connections: ConnectionManager,
    executor: CommandExecutor,
    runtime: Arc<dyn ContainerRuntime>,
}

impl SessionManager {
    /// Connect to the container engine and build a manager for real stores
    pub async fn connect(store: StoreConfig) -> Result<Self> {
        let runtime = DockerRuntime::connect(
            store.docker_socket.as_deref(),
            store.engine_timeout(),
            store.pull_timeout(),
        )
        .context("Failed to connect to container engine")?;
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);

        match runtime.version().await {
            Some(version) => info!(engine_version = %version, "Container engine initialized"),
            None => warn!("Container engine not answering, sessions will fail until it is reachable"),
        }

        let connector = Arc::new(RedisConnector::new(store.command_timeout()));
        Ok(Self::with_backends(store, runtime, connector))
    }

    /// Build a manager over the given engine and store connector
    pub fn with_backends(
        store: StoreConfig,
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            provisioner: Provisioner::new(
                runtime.clone(),
                store.host_ip.clone(),
                store.settle_window(),
            ),
            connections: ConnectionManager::new(connector, store.connect_timeout()),
            executor: CommandExecutor::new(
                store.execution_mode,
                runtime.clone(),
                store.max_exec_output_bytes,
                store.command_timeout(),
            ),
            runtime,
            store,
        }
    }

    /// Provision a container, connect to its store and register the session.
    ///
    /// Nothing is left behind on failure: a container whose store could not
    /// be reached is torn down before the error is returned.
    pub async fn start_session(&self, scenario: Scenario) -> SandboxResult<StartedSession> {
        info!(scenario = %scenario.name, "Starting session");

        let container = match self
            .provisioner
            .provision(&self.store.image, self.store.service_port, &self.store.limits)
            .await
        {
            Ok(container) => container,
            Err(e) => {
                error!(scenario = %scenario.name, error = %e, "Provisioning failed");
                metrics::record_session_failed("provision");
                return Err(e);
            }
        };

        self.settle().await;

        let connection = match self.connections.connect(self.endpoint(&container)).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(container_id = %container.id, error = %e, "Store unreachable, discarding container");
                self.discard(&container).await;
                metrics::record_session_failed("connect");
                return Err(e);
            }
        };

        match self.registry.create(scenario, container, connection).await {
            Ok(session) => {
                info!(
                    session_id = %session.id,
                    scenario = %session.scenario.name,
                    container_id = %session.container_id,
                    host_port = session.host_port(),
                    "Session started"
                );
                metrics::record_session_started();
                Ok(StartedSession {
                    session_id: session.id,
                    name: session.scenario.name.clone(),
                    host_port: session.host_port(),
                })
            }
            Err(Rejected {
                error,
                container,
                mut connection,
            }) => {
                error!(container_id = %container.id, error = %error, "Session registration refused");
                self.connections.close(&mut connection).await;
                self.discard(&container).await;
                metrics::record_session_failed("register");
                Err(error)
            }
        }
    }

    /// Run `command` with `args` in the session's sandbox.
    ///
    /// The command name is checked before anything touches the store. The
    /// container is restarted and the connection reopened when needed, and a
    /// command that hits a dead connection is retried once after healing.
    pub async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        args: &[String],
    ) -> SandboxResult<CommandReply> {
        let session = self.lookup(session_id).await?;
        let mode = self.executor.mode().as_str();

        let prepared = match self.executor.prepare(command) {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(session_id = %session.id, command = %command, "Rejected unsupported command");
                metrics::record_command(mode, "invalid", 0.0);
                return Err(e);
            }
        };

        let mut guard = session.lock().await;
        let state: &mut SessionState = &mut guard;
        if state.status == SessionStatus::Ended {
            return Err(SandboxError::NotFound(session_id.to_string()));
        }

        let started = Instant::now();
        let result = self.run_with_retry(&session, state, &prepared, args).await;
        let elapsed = started.elapsed();

        state.touch();
        session.increment_commands();

        let outcome = match &result {
            Ok(_) => "ok",
            Err(SandboxError::Store(_)) => "store_error",
            Err(_) => {
                session.increment_errors();
                "failed"
            }
        };
        metrics::record_command(mode, outcome, elapsed.as_secs_f64());

        match &result {
            Ok(_) => debug!(
                session_id = %session.id,
                command = %prepared.name(),
                duration_ms = elapsed.as_millis() as u64,
                "Command executed"
            ),
            Err(e) if e.is_client_error() => debug!(
                session_id = %session.id,
                command = %prepared.name(),
                error = %e,
                "Store rejected command"
            ),
            Err(e) => error!(
                session_id = %session.id,
                command = %prepared.name(),
                error = %e,
                "Command failed"
            ),
        }

        result
    }

    /// End a session: close its connection, remove its container and drop it
    /// from the registry.
    ///
    /// The session is unreachable from the moment this is called, even when
    /// teardown reports an error.
    pub async fn end_session(&self, session_id: &str) -> SandboxResult<()> {
        let session = self.lookup(session_id).await?;

        let mut guard = session.lock().await;
        let state: &mut SessionState = &mut guard;
        if state.status == SessionStatus::Ended {
            return Err(SandboxError::NotFound(session_id.to_string()));
        }
        state.status = SessionStatus::Ended;
        self.registry.delete(&session.id).await;

        let result = self.release(state).await;
        metrics::record_session_ended(result.is_ok());

        match &result {
            Ok(()) => info!(session_id = %session.id, "Session ended"),
            Err(e) => error!(session_id = %session.id, error = %e, "Session ended with teardown errors"),
        }

        result
    }

    /// Summary of one session
    pub async fn session_info(&self, session_id: &str) -> SandboxResult<SessionInfo> {
        let session = self.lookup(session_id).await?;
        let state = session.lock().await;
        if state.status == SessionStatus::Ended {
            return Err(SandboxError::NotFound(session_id.to_string()));
        }
        Ok(session.info(&state))
    }

    /// Summaries of all live sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for session in self.registry.list().await {
            let state = session.lock().await;
            if state.status == SessionStatus::Active {
                infos.push(session.info(&state));
            }
        }
        infos
    }

    /// Move the session to its next scenario step
    pub async fn advance_step(&self, session_id: &str) -> SandboxResult<StepResponse> {
        let session = self.lookup(session_id).await?;
        let mut state = session.lock().await;
        if state.status == SessionStatus::Ended {
            return Err(SandboxError::NotFound(session_id.to_string()));
        }

        state.step += 1;
        let current = usize::try_from(state.step)
            .ok()
            .and_then(|index| session.scenario.step(index))
            .cloned();

        debug!(session_id = %session.id, step = state.step, "Session step advanced");

        Ok(StepResponse {
            session_id: session.id,
            step: state.step,
            total_steps: session.scenario.steps.len(),
            current,
        })
    }

    pub async fn active_session_count(&self) -> u64 {
        self.registry.len().await as u64
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.executor.mode()
    }

    pub async fn engine_version(&self) -> Option<String> {
        self.runtime.version().await
    }

    /// End every session. Returns how many were torn down cleanly.
    pub async fn shutdown(&self) -> usize {
        let sessions = self.registry.drain().await;
        if sessions.is_empty() {
            return 0;
        }

        info!(count = sessions.len(), "Draining sessions");
        let results = join_all(sessions.iter().map(|session| self.drain_one(session))).await;
        let clean = results.into_iter().filter(|ok| *ok).count();
        info!(clean, total = sessions.len(), "Sessions drained");

        clean
    }

    async fn drain_one(&self, session: &Session) -> bool {
        let mut guard = session.lock().await;
        let state: &mut SessionState = &mut guard;
        if state.status == SessionStatus::Ended {
            return true;
        }
        state.status = SessionStatus::Ended;

        let result = self.release(state).await;
        metrics::record_session_ended(result.is_ok());
        if let Err(e) = &result {
            warn!(session_id = %session.id, error = %e, "Teardown failed during drain");
        }
        result.is_ok()
    }

    async fn lookup(&self, session_id: &str) -> SandboxResult<SessionHandle> {
        let id = Uuid::parse_str(session_id)
            .map_err(|_| SandboxError::NotFound(session_id.to_string()))?;
        self.registry
            .get(&id)
            .await
            .map_err(|_| SandboxError::NotFound(session_id.to_string()))
    }

    async fn run_with_retry(
        &self,
        session: &Session,
        state: &mut SessionState,
        command: &PreparedCommand,
        args: &[String],
    ) -> SandboxResult<CommandReply> {
        let reason = match self.attempt(session, state, command, args).await {
            Err(SandboxError::Connection(reason)) => reason,
            other => return other,
        };

        warn!(session_id = %session.id, reason = %reason, "Lost the sandbox mid-command, healing and retrying once");
        metrics::record_reconnect();
        state.connection.invalidate();

        self.attempt(session, state, command, args).await
    }

    async fn attempt(
        &self,
        session: &Session,
        state: &mut SessionState,
        command: &PreparedCommand,
        args: &[String],
    ) -> SandboxResult<CommandReply> {
        self.heal(session, state).await?;
        self.executor
            .execute(&state.container, &mut state.connection, command, args)
            .await
    }

    /// Restart the container if it stopped and reopen the connection if it
    /// closed or the host port moved
    async fn heal(&self, session: &Session, state: &mut SessionState) -> SandboxResult<()> {
        if self.provisioner.ensure_running(&mut state.container).await? {
            metrics::record_container_restart();
            state.connection.invalidate();
            self.settle().await;
        }
        session.set_host_port(state.container.host_port);

        let endpoint = self.endpoint(&state.container);
        if self.connections.ensure_open(&mut state.connection, &endpoint).await? {
            debug!(session_id = %session.id, endpoint = %endpoint, "Session reconnected");
        }
        Ok(())
    }

    async fn release(&self, state: &mut SessionState) -> SandboxResult<()> {
        self.connections.close(&mut state.connection).await;
        self.provisioner.teardown(&state.container).await
    }

    async fn discard(&self, container: &ContainerHandle) {
        if let Err(e) = self.provisioner.teardown(container).await {
            warn!(container_id = %container.id, error = %e, "Failed to discard container");
        }
    }

    async fn settle(&self) {
        let delay = self.store.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn endpoint(&self, container: &ContainerHandle) -> Endpoint {
        Endpoint::new(self.store.host_ip.clone(), container.host_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConnectionHandle, StoreCommand};
    use crate::testing::{FakeConnector, FakeEngine};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn store_config(mode: ExecutionMode) -> StoreConfig {
        StoreConfig {
            execution_mode: mode,
            settle_delay_ms: 0,
            settle_window_secs: 1,
            connect_timeout_ms: 300,
            ..StoreConfig::default()
        }
    }

    fn manager_with_mode(engine: &Arc<FakeEngine>, mode: ExecutionMode) -> SessionManager {
        SessionManager::with_backends(
            store_config(mode),
            engine.clone(),
            Arc::new(FakeConnector::new(engine.clone())),
        )
    }

    fn manager(engine: &Arc<FakeEngine>) -> SessionManager {
        manager_with_mode(engine, ExecutionMode::Direct)
    }

    fn scenario() -> Scenario {
        Scenario::parse(
            r#"
name: redis-basics
steps:
  - SET a key
  - read it back
"#,
        )
        .unwrap()
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    async fn container_of(manager: &SessionManager, id: Uuid) -> String {
        manager.registry.get(&id).await.unwrap().container_id.clone()
    }

    #[tokio::test]
    async fn test_start_session_registers_and_connects() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);

        let started = manager.start_session(scenario()).await.unwrap();

        assert_eq!(started.name, "redis-basics");
        assert_eq!(manager.active_session_count().await, 1);
        assert_eq!(engine.live_containers(), 1);

        let info = manager.session_info(&started.session_id.to_string()).await.unwrap();
        assert_eq!(info.status, SessionStatus::Active);
        assert_eq!(info.host_port, started.host_port);
        assert!(info.connected);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);

        let mut ids = HashSet::new();
        for _ in 0..5 {
            let started = manager.start_session(scenario()).await.unwrap();
            assert!(ids.insert(started.session_id));
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        let reply = manager.execute_command(&id, "SET", &args(&["k", "v"])).await.unwrap();
        assert_eq!(reply, CommandReply::Text("OK".into()));

        let reply = manager.execute_command(&id, "get", &args(&["k"])).await.unwrap();
        assert_eq!(reply, CommandReply::Text("v".into()));

        let reply = manager.execute_command(&id, "GET", &args(&["missing"])).await.unwrap();
        assert_eq!(reply, CommandReply::Nil);
    }

    #[tokio::test]
    async fn test_lpush_lrange_order() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        manager
            .execute_command(&id, "LPUSH", &args(&["mylist", "a", "b"]))
            .await
            .unwrap();
        let reply = manager
            .execute_command(&id, "LRANGE", &args(&["mylist", "0", "-1"]))
            .await
            .unwrap();

        assert_eq!(
            reply,
            CommandReply::List(vec![CommandReply::Text("b".into()), CommandReply::Text("a".into())])
        );
    }

    #[tokio::test]
    async fn test_invalid_command_never_reaches_store() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();
        let before = engine.store_ops();

        let err = manager
            .execute_command(&id, "NOTACOMMAND", &args(&["x"]))
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::InvalidCommand(_)));
        assert_eq!(engine.store_ops(), before);
    }

    #[tokio::test]
    async fn test_store_error_is_passed_through() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        let err = manager.execute_command(&id, "GET", &[]).await.unwrap_err();

        match err {
            SandboxError::Store(message) => {
                assert_eq!(message, "ERR wrong number of arguments for 'get' command")
            }
            other => panic!("expected store error, got {:?}", other),
        }

        // The session is still usable afterwards
        assert!(manager.execute_command(&id, "PING", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);

        for id in ["not-a-uuid", &Uuid::new_v4().to_string()] {
            assert!(matches!(
                manager.execute_command(id, "PING", &[]).await,
                Err(SandboxError::NotFound(_))
            ));
            assert!(matches!(manager.end_session(id).await, Err(SandboxError::NotFound(_))));
            assert!(matches!(manager.advance_step(id).await, Err(SandboxError::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn test_end_session_releases_everything() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        manager.end_session(&id).await.unwrap();

        assert_eq!(manager.active_session_count().await, 0);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(engine.quits(), 1);
        assert!(matches!(
            manager.execute_command(&id, "PING", &[]).await,
            Err(SandboxError::NotFound(_))
        ));
        assert!(matches!(manager.session_info(&id).await, Err(SandboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_end_twice_is_not_found_and_tears_down_once() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        manager.end_session(&id).await.unwrap();
        let err = manager.end_session(&id).await.unwrap_err();

        assert!(matches!(err, SandboxError::NotFound(_)));
        assert_eq!(engine.removes(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_get_distinct_ports() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);

        let (a, b, c) = tokio::join!(
            manager.start_session(scenario()),
            manager.start_session(scenario()),
            manager.start_session(scenario()),
        );
        let ports: HashSet<u16> = [a.unwrap(), b.unwrap(), c.unwrap()]
            .iter()
            .map(|s| s.host_port)
            .collect();

        assert_eq!(ports.len(), 3);
        assert_eq!(engine.live_containers(), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_out_of_band_stop() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let started = manager.start_session(scenario()).await.unwrap();
        let id = started.session_id.to_string();
        let container_id = container_of(&manager, started.session_id).await;

        manager.execute_command(&id, "SET", &args(&["k", "v"])).await.unwrap();
        engine.stop_out_of_band(&container_id);

        let reply = manager.execute_command(&id, "GET", &args(&["k"])).await.unwrap();

        assert_eq!(reply, CommandReply::Text("v".into()));
        assert!(engine.is_running(&container_id));

        let info = manager.session_info(&id).await.unwrap();
        assert_ne!(info.host_port, started.host_port);
        assert_eq!(info.container_id, container_id);
    }

    #[tokio::test]
    async fn test_reconnects_after_dropped_connection() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let started = manager.start_session(scenario()).await.unwrap();
        let id = started.session_id.to_string();
        let container_id = container_of(&manager, started.session_id).await;

        engine.drop_connections(&container_id);

        assert!(manager.execute_command(&id, "PING", &[]).await.is_ok());
        assert_eq!(engine.opened_links(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        engine.fail_next_calls(1);
        let reply = manager.execute_command(&id, "SET", &args(&["k", "v"])).await.unwrap();
        assert_eq!(reply, CommandReply::Text("OK".into()));

        engine.fail_next_calls(2);
        let err = manager.execute_command(&id, "GET", &args(&["k"])).await.unwrap_err();
        assert!(matches!(err, SandboxError::Connection(_)));

        let info = manager.session_info(&id).await.unwrap();
        assert_eq!(info.command_count, 2);
        assert_eq!(info.error_count, 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_leaves_nothing_behind() {
        let engine = FakeEngine::shared();
        engine.refuse_connections(true);
        let manager = manager(&engine);

        let err = manager.start_session(scenario()).await.unwrap_err();

        assert!(matches!(err, SandboxError::Connection(_)));
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(manager.active_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_takes_port_freed_by_stopped_session() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let first = manager.start_session(scenario()).await.unwrap();
        let first_id = first.session_id.to_string();
        let first_container = container_of(&manager, first.session_id).await;
        manager.execute_command(&first_id, "SET", &args(&["k", "v"])).await.unwrap();

        engine.stop_out_of_band(&first_container);
        engine.reuse_port(first.host_port);

        let second = manager.start_session(scenario()).await.unwrap();
        assert_eq!(second.host_port, first.host_port);
        assert_eq!(manager.active_session_count().await, 2);

        let reply = manager.execute_command(&first_id, "GET", &args(&["k"])).await.unwrap();
        assert_eq!(reply, CommandReply::Text("v".into()));
        let info = manager.session_info(&first_id).await.unwrap();
        assert_ne!(info.host_port, second.host_port);
    }

    #[tokio::test]
    async fn test_teardown_failure_still_unregisters() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        engine.fail_remove(true);
        let err = manager.end_session(&id).await.unwrap_err();
        assert!(matches!(err, SandboxError::Teardown(_)));
        assert_eq!(engine.stops(), 1);

        let err = manager.end_session(&id).await.unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));
        assert_eq!(manager.active_session_count().await, 0);
        assert_eq!(engine.removes(), 1);
    }

    #[tokio::test]
    async fn test_refused_registration_releases_resources() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let held = ContainerHandle {
            id: "fake1".into(),
            name: "storebox-held".into(),
            service_port: 6379,
            host_port: 50000,
        };
        let detached = ConnectionHandle::detached(Endpoint::new("127.0.0.1", 50000));
        manager.registry.create(scenario(), held, detached).await.unwrap();

        let err = manager.start_session(scenario()).await.unwrap_err();

        assert!(matches!(err, SandboxError::Conflict(_)));
        assert_eq!(engine.opened_links(), 1);
        assert_eq!(engine.quits(), 1);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(manager.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_failure_is_provision_error() {
        let engine = FakeEngine::shared();
        engine.fail_create(true);
        let manager = manager(&engine);

        let err = manager.start_session(scenario()).await.unwrap_err();

        assert!(matches!(err, SandboxError::Provision(_)));
        assert_eq!(engine.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_advance_step_walks_the_scenario() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();

        let step = manager.advance_step(&id).await.unwrap();
        assert_eq!(step.step, 1);
        assert_eq!(step.total_steps, 2);
        assert_eq!(step.current, Some(serde_json::json!("read it back")));

        let step = manager.advance_step(&id).await.unwrap();
        assert_eq!(step.step, 2);
        assert_eq!(step.current, None);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        let first = manager.start_session(scenario()).await.unwrap();
        let second = manager.start_session(scenario()).await.unwrap();

        manager.end_session(&first.session_id.to_string()).await.unwrap();
        let sessions = manager.list_sessions().await;

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_sessions() {
        let engine = FakeEngine::shared();
        let manager = manager(&engine);
        for _ in 0..3 {
            manager.start_session(scenario()).await.unwrap();
        }

        assert_eq!(manager.shutdown().await, 3);
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(manager.active_session_count().await, 0);
        assert_eq!(manager.shutdown().await, 0);
    }

    #[tokio::test]
    async fn test_exec_bridge_mode() {
        let engine = FakeEngine::shared();
        let manager = manager_with_mode(&engine, ExecutionMode::ExecBridge);
        let id = manager.start_session(scenario()).await.unwrap().session_id.to_string();
        assert_eq!(manager.execution_mode(), ExecutionMode::ExecBridge);

        manager
            .execute_command(&id, "rpush", &args(&["l", "x", "y"]))
            .await
            .unwrap();
        let reply = manager
            .execute_command(&id, "LRANGE", &args(&["l", "0", "-1"]))
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::Text("x\ny".into()));

        let err = manager.execute_command(&id, "GET", &[]).await.unwrap_err();
        assert!(matches!(err, SandboxError::Store(_)));

        let err = manager.execute_command(&id, "SHUTDOWN", &[]).await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidCommand(_)));
    }

    #[test]
    fn test_store_command_set_covers_basics() {
        for name in ["SET", "GET", "DEL", "LPUSH", "LRANGE", "PING"] {
            assert!(name.parse::<StoreCommand>().is_ok(), "{} should be supported", name);
        }
    }
}
