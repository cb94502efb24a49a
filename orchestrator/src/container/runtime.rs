//! Container engine access through the Docker/Podman API

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};

use super::output::{collect_output, OutputChunk};

/// Grace period handed to the engine when stopping a container
const STOP_GRACE_SECONDS: i64 = 5;

/// Errors reported by the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No such container or image: {0}")]
    NotFound(String),

    #[error("Container already in requested state")]
    NotModified,

    #[error("Container engine conflict: {0}")]
    Conflict(String),

    #[error("Container engine unreachable: {0}")]
    Unavailable(String),

    #[error("Container engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Container engine error: {0}")]
    Other(String),
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                404 => EngineError::NotFound(message),
                304 => EngineError::NotModified,
                409 => EngineError::Conflict(message),
                _ => EngineError::Other(format!("{}: {}", status_code, message)),
            },
            other => EngineError::Unavailable(other.to_string()),
        }
    }
}

/// What the provisioner asks the engine to create
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub service_port: u16,
    pub host_ip: String,
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub labels: HashMap<String, String>,
}

/// Observed state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerStatus {
    pub running: bool,
    /// Host port published for the service port, once the engine assigned one
    pub host_port: Option<u16>,
}

/// Captured result of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Interleaved stdout/stderr in arrival order
    pub output: String,
    pub stderr_seen: bool,
    pub truncated: bool,
    pub exit_code: Option<i64>,
}

/// Operations the lifecycle core needs from a container engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure the image is present locally, pulling it if needed
    async fn ensure_image(&self, image: &str) -> Result<(), EngineError>;

    /// Create a container and return its engine id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    async fn inspect(&self, id: &str, service_port: u16) -> Result<ContainerStatus, EngineError>;

    async fn stop(&self, id: &str) -> Result<(), EngineError>;

    async fn remove(&self, id: &str) -> Result<(), EngineError>;

    /// Run `cmd` inside the container, capturing at most `output_limit` bytes
    /// and giving up on the output stream after `deadline`
    async fn exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        output_limit: usize,
        deadline: Duration,
    ) -> Result<ExecOutput, EngineError>;

    /// Engine version string, if the engine answers
    async fn version(&self) -> Option<String>;
}

/// `ContainerRuntime` backed by the Docker engine API (also spoken by Podman)
pub struct DockerRuntime {
    docker: Docker,
    call_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the engine, either at an explicit socket or via local defaults
    pub fn connect(
        socket: Option<&str>,
        call_timeout: Duration,
        pull_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                path,
                call_timeout.as_secs().max(1),
                bollard::API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_local_defaults()?,
        };

        Ok(Self {
            docker,
            call_timeout,
            pull_timeout,
        })
    }

    /// Apply the per-call timeout to an engine request
    async fn call<T, F>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, bollard::errors::Error>>,
    {
        timeout(self.call_timeout, fut)
            .await
            .map_err(|_| EngineError::Timeout(self.call_timeout))?
            .map_err(EngineError::from)
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);

        let pull = async {
            while let Some(update) = progress.next().await {
                let update = update?;
                if let Some(status) = update.status {
                    debug!(image = %image, status = %status, "Pull progress");
                }
            }
            Ok::<(), bollard::errors::Error>(())
        };

        timeout(self.pull_timeout, pull)
            .await
            .map_err(|_| EngineError::Timeout(self.pull_timeout))?
            .map_err(EngineError::from)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        match self.call(self.docker.inspect_image(image)).await {
            Ok(_) => Ok(()),
            Err(EngineError::NotFound(_)) => self.pull_image(image).await,
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let port_key = format!("{}/tcp", spec.service_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        // Empty host port: the engine picks a free ephemeral port
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some(spec.host_ip.clone()),
                host_port: Some(String::new()),
            }]),
        );

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                memory: Some(spec.memory_bytes),
                memory_swap: Some(spec.memory_swap_bytes),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .call(self.docker.create_container(Some(options), config))
            .await?;

        debug!(container_id = %response.id, warnings = ?response.warnings, "Container created");
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.call(
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn inspect(&self, id: &str, service_port: u16) -> Result<ContainerStatus, EngineError> {
        let details = self
            .call(
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .await?;

        let running = details
            .state
            .and_then(|state| state.running)
            .unwrap_or(false);

        let port_key = format!("{}/tcp", service_port);
        let host_port = details
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&port_key).flatten())
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .filter_map(|binding| binding.host_port)
                    .find_map(|port| port.parse::<u16>().ok())
            });

        Ok(ContainerStatus { running, host_port })
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        self.call(self.docker.stop_container(
            id,
            Some(StopContainerOptions {
                t: STOP_GRACE_SECONDS,
            }),
        ))
        .await
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.call(self.docker.remove_container(
            id,
            Some(RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            }),
        ))
        .await
    }

    async fn exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        output_limit: usize,
        deadline: Duration,
    ) -> Result<ExecOutput, EngineError> {
        let exec = self
            .call(self.docker.create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            ))
            .await?;

        let started = self.call(self.docker.start_exec(&exec.id, None)).await?;

        let captured = match started {
            StartExecResults::Attached { output, .. } => {
                let chunks = output
                    .map(|item| item.map(OutputChunk::from).map_err(EngineError::from));
                timeout(deadline, collect_output(chunks, output_limit))
                    .await
                    .map_err(|_| EngineError::Timeout(deadline))??
            }
            StartExecResults::Detached => {
                return Err(EngineError::Other("exec started detached".to_string()))
            }
        };

        let inspected = self.call(self.docker.inspect_exec(&exec.id)).await?;

        Ok(ExecOutput {
            exit_code: inspected.exit_code,
            ..captured
        })
    }

    async fn version(&self) -> Option<String> {
        self.docker.version().await.ok().and_then(|v| v.version)
    }
}
