//! Container provisioning for store sandboxes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ResourceLimits;
use crate::error::{SandboxError, SandboxResult};

use super::runtime::{ContainerRuntime, ContainerSpec, EngineError};

/// Label placed on every container we create, so strays can be found later
pub const MANAGED_LABEL: &str = "io.storebox.managed";

/// Interval between state polls while waiting for a container to come up
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A provisioned backing container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine container id
    pub id: String,

    /// Container name
    pub name: String,

    /// Port the store listens on inside the container
    pub service_port: u16,

    /// Host port currently published for `service_port`
    pub host_port: u16,
}

/// Creates, heals and removes backing containers
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    host_ip: String,
    settle_window: Duration,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        host_ip: String,
        settle_window: Duration,
    ) -> Self {
        Self {
            runtime,
            host_ip,
            settle_window,
        }
    }

    /// Create and start a container for `image`, publishing `service_port`
    /// on an engine-assigned host port.
    ///
    /// A container that was created but never reached the running state is
    /// removed before the error is returned.
    pub async fn provision(
        &self,
        image: &str,
        service_port: u16,
        limits: &ResourceLimits,
    ) -> SandboxResult<ContainerHandle> {
        self.runtime
            .ensure_image(image)
            .await
            .map_err(|e| provision_error("image unavailable", e))?;

        let name = format!("storebox-{}", Uuid::new_v4().simple());
        let spec = ContainerSpec {
            name: name.clone(),
            image: image.to_string(),
            service_port,
            host_ip: self.host_ip.clone(),
            memory_bytes: mb_to_bytes(limits.memory_mb),
            memory_swap_bytes: mb_to_bytes(limits.memory_mb.saturating_add(limits.swap_mb)),
            labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
        };

        debug!(name = %name, image = %image, "Creating container");

        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(|e| provision_error("create failed", e))?;

        let host_port = match self.start_and_resolve(&id, service_port).await {
            Ok(port) => port,
            Err(e) => {
                error!(container_id = %id, error = %e, "Container failed to start, removing");
                if let Err(cleanup) = self.runtime.remove(&id).await {
                    warn!(container_id = %id, error = %cleanup, "Failed to remove container after start failure");
                }
                return Err(e);
            }
        };

        info!(
            container_id = %id,
            name = %name,
            host_port = host_port,
            "Container started"
        );

        Ok(ContainerHandle {
            id,
            name,
            service_port,
            host_port,
        })
    }

    /// Restart the container if it was stopped behind our back.
    ///
    /// Returns `true` when a restart happened; the caller must allow the store
    /// a settle delay and treat any prior connection as stale. The handle's
    /// host port is refreshed either way since a restart may rebind it.
    pub async fn ensure_running(&self, handle: &mut ContainerHandle) -> SandboxResult<bool> {
        let status = self
            .runtime
            .inspect(&handle.id, handle.service_port)
            .await
            .map_err(|e| provision_error("inspect failed", e))?;

        if status.running {
            if let Some(port) = status.host_port {
                handle.host_port = port;
            }
            return Ok(false);
        }

        warn!(container_id = %handle.id, "Container not running, restarting");
        handle.host_port = self.start_and_resolve(&handle.id, handle.service_port).await?;
        info!(container_id = %handle.id, host_port = handle.host_port, "Container restarted");

        Ok(true)
    }

    /// Stop and remove the container. Missing or already-stopped containers
    /// are not errors.
    pub async fn teardown(&self, handle: &ContainerHandle) -> SandboxResult<()> {
        let mut failures = Vec::new();

        match self.runtime.stop(&handle.id).await {
            Ok(()) | Err(EngineError::NotModified) | Err(EngineError::NotFound(_)) => {}
            Err(e) => {
                warn!(container_id = %handle.id, error = %e, "Container stop failed, forcing removal");
                failures.push(format!("stop: {}", e));
            }
        }

        match self.runtime.remove(&handle.id).await {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => failures.push(format!("remove: {}", e)),
        }

        if failures.is_empty() {
            debug!(container_id = %handle.id, "Container removed");
            Ok(())
        } else {
            Err(SandboxError::Teardown(format!(
                "container {}: {}",
                handle.name,
                failures.join("; ")
            )))
        }
    }

    async fn start_and_resolve(&self, id: &str, service_port: u16) -> SandboxResult<u16> {
        match self.runtime.start(id).await {
            Ok(()) | Err(EngineError::NotModified) => {}
            Err(e) => return Err(provision_error("start failed", e)),
        }
        self.wait_running(id, service_port).await
    }

    /// Poll until the container runs with its port published, or the settle
    /// window runs out
    async fn wait_running(&self, id: &str, service_port: u16) -> SandboxResult<u16> {
        let deadline = Instant::now() + self.settle_window;

        loop {
            let status = self
                .runtime
                .inspect(id, service_port)
                .await
                .map_err(|e| provision_error("inspect failed", e))?;

            if status.running {
                if let Some(port) = status.host_port {
                    return Ok(port);
                }
            }

            if Instant::now() >= deadline {
                return Err(SandboxError::Provision(format!(
                    "container {} not running with a published port after {:?}",
                    id, self.settle_window
                )));
            }

            sleep(POLL_INTERVAL).await;
        }
    }
}

fn provision_error(stage: &str, err: EngineError) -> SandboxError {
    SandboxError::Provision(format!("{}: {}", stage, err))
}

fn mb_to_bytes(mb: u64) -> i64 {
    i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}
