//! Command execution against a sandbox's store

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::container::{ContainerHandle, ContainerRuntime, ExecOutput};
use crate::error::{SandboxError, SandboxResult};

use super::command::{bridge_command_name, CommandReply, StoreCommand};
use super::connection::{is_transport, store_message, ConnectionHandle};

/// Command-line client run inside the container by the exec bridge
const STORE_CLI: &str = "redis-cli";

/// How commands reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Typed calls over the session's client connection
    #[default]
    Direct,
    /// `redis-cli` run inside the container, output captured as text
    ExecBridge,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Direct => "direct",
            ExecutionMode::ExecBridge => "exec_bridge",
        }
    }
}

/// A command that passed validation for the active mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedCommand {
    Direct(StoreCommand),
    Bridge(String),
}

impl PreparedCommand {
    pub fn name(&self) -> &str {
        match self {
            PreparedCommand::Direct(command) => command.name(),
            PreparedCommand::Bridge(name) => name,
        }
    }
}

/// Validates and runs store commands using one of the two strategies
pub struct CommandExecutor {
    mode: ExecutionMode,
    runtime: Arc<dyn ContainerRuntime>,
    output_limit: usize,
    command_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(
        mode: ExecutionMode,
        runtime: Arc<dyn ContainerRuntime>,
        output_limit: usize,
        command_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            runtime,
            output_limit,
            command_timeout,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Check `name` against what the active strategy supports
    pub fn prepare(&self, name: &str) -> SandboxResult<PreparedCommand> {
        match self.mode {
            ExecutionMode::Direct => name.parse::<StoreCommand>().map(PreparedCommand::Direct),
            ExecutionMode::ExecBridge => bridge_command_name(name).map(PreparedCommand::Bridge),
        }
    }

    /// Run a prepared command.
    ///
    /// Transport failures come back as `SandboxError::Connection` so the
    /// caller can heal the sandbox and retry; replies the store rejected come
    /// back as `SandboxError::Store` with the store's wording.
    pub async fn execute(
        &self,
        container: &ContainerHandle,
        connection: &mut ConnectionHandle,
        command: &PreparedCommand,
        args: &[String],
    ) -> SandboxResult<CommandReply> {
        let started = Instant::now();

        let result = match command {
            PreparedCommand::Direct(command) => {
                self.dispatch_direct(connection, *command, args).await
            }
            PreparedCommand::Bridge(name) => self.dispatch_bridge(container, name, args).await,
        };

        debug!(
            command = %command.name(),
            args = args.len(),
            mode = self.mode.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Command dispatched"
        );

        result
    }

    async fn dispatch_direct(
        &self,
        connection: &mut ConnectionHandle,
        command: StoreCommand,
        args: &[String],
    ) -> SandboxResult<CommandReply> {
        let endpoint = connection.endpoint().clone();
        let link = connection.link_mut().ok_or_else(|| {
            SandboxError::Connection(format!("{}: connection is closed", endpoint))
        })?;

        let reply = link.call(command, args).await;
        match reply {
            Ok(value) => Ok(command.decode(value)),
            Err(e) if is_transport(&e) => {
                connection.invalidate();
                Err(SandboxError::Connection(format!("{}: {}", endpoint, e)))
            }
            Err(e) => Err(SandboxError::Store(store_message(&e))),
        }
    }

    async fn dispatch_bridge(
        &self,
        container: &ContainerHandle,
        name: &str,
        args: &[String],
    ) -> SandboxResult<CommandReply> {
        let mut cmd = Vec::with_capacity(args.len() + 2);
        cmd.push(STORE_CLI.to_string());
        cmd.push(name.to_string());
        cmd.extend(args.iter().cloned());

        let output = self
            .runtime
            .exec(&container.id, cmd, self.output_limit, self.command_timeout)
            .await
            .map_err(|e| SandboxError::Connection(format!("exec in {}: {}", container.name, e)))?;

        if output.truncated {
            warn!(
                container_id = %container.id,
                limit = self.output_limit,
                "Command output truncated"
            );
        }

        match bridge_failure(&output) {
            Some(message) => Err(SandboxError::Store(message)),
            None => Ok(CommandReply::Text(output.output)),
        }
    }
}

/// Error text of a failed `redis-cli` run, if it failed
fn bridge_failure(output: &ExecOutput) -> Option<String> {
    let text = output.output.trim();

    if let Some(message) = text.strip_prefix("(error) ") {
        return Some(message.to_string());
    }

    match output.exit_code {
        Some(code) if code != 0 => Some(if text.is_empty() {
            format!("{} exited with status {}", STORE_CLI, code)
        } else {
            text.to_string()
        }),
        _ => None,
    }
}
