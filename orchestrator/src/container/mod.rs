//! Container management module
//!
//! Handles all interactions with the container engine:
//! - Creating and starting store containers on dynamic host ports
//! - Restarting containers stopped out-of-band
//! - Running commands inside containers and capturing their output
//! - Stopping and removing containers

mod output;
mod provisioner;
mod runtime;

pub use output::{collect_output, OutputChunk};
pub use provisioner::{ContainerHandle, Provisioner, MANAGED_LABEL};
pub use runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, DockerRuntime, EngineError, ExecOutput,
};

#[cfg(test)]
pub use runtime::MockContainerRuntime;
