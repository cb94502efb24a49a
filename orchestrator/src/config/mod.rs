//! Configuration module for the storebox orchestrator
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with STOREBOX_ prefix, `__` as separator)
//! - A `.env` file in the working directory

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::ExecutionMode;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scenario used when a start request carries none
    #[serde(default = "default_scenario_path")]
    pub scenario_path: PathBuf,

    /// Tear down every session when the orchestrator shuts down
    #[serde(default = "default_true")]
    pub drain_on_shutdown: bool,

    /// Backing store sandbox settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// Settings for the per-session store containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store image every sandbox runs
    #[serde(default = "default_image")]
    pub image: String,

    /// Port the store listens on inside the container
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Host address published ports bind to
    #[serde(default = "default_host_ip")]
    pub host_ip: String,

    /// Memory/swap ceilings applied to every sandbox
    #[serde(default)]
    pub limits: ResourceLimits,

    /// How commands reach the store
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Engine socket path (local defaults when unset)
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Store connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single engine call in seconds
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,

    /// Timeout for pulling the image in seconds
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    /// Timeout for a single store command in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Pause after (re)starting a container before talking to the store
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// How long a started container may take to report running, in seconds
    #[serde(default = "default_settle_window")]
    pub settle_window_secs: u64,

    /// Cap on captured exec-bridge output in bytes
    #[serde(default = "default_max_exec_output")]
    pub max_exec_output_bytes: usize,
}

/// Resource limits for a store container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum memory in megabytes
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Swap allowed on top of `memory_mb`, in megabytes
    #[serde(default)]
    pub swap_mb: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scenario_path() -> PathBuf {
    PathBuf::from("redis-session.yaml")
}

fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "redis:latest".to_string()
}

fn default_service_port() -> u16 {
    6379
}

fn default_host_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_engine_timeout() -> u64 {
    30
}

fn default_pull_timeout() -> u64 {
    300
}

fn default_command_timeout() -> u64 {
    10
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_settle_window() -> u64 {
    15
}

fn default_max_exec_output() -> usize {
    1024 * 1024
}

fn default_memory_mb() -> u64 {
    256
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            swap_mb: 0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            service_port: default_service_port(),
            host_ip: default_host_ip(),
            limits: ResourceLimits::default(),
            execution_mode: ExecutionMode::default(),
            docker_socket: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            engine_timeout_secs: default_engine_timeout(),
            pull_timeout_secs: default_pull_timeout(),
            command_timeout_secs: default_command_timeout(),
            settle_delay_ms: default_settle_delay_ms(),
            settle_window_secs: default_settle_window(),
            max_exec_output_bytes: default_max_exec_output(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            scenario_path: default_scenario_path(),
            drain_on_shutdown: true,
            store: StoreConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_secs(self.settle_window_secs)
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/storebox").required(false))
            .add_source(config::File::with_name("/etc/storebox/config").required(false))
            // Override with environment variables (STOREBOX_ prefix)
            .add_source(
                config::Environment::with_prefix("STOREBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.store.service_port == 0 {
            anyhow::bail!("Store service port cannot be 0");
        }

        if self.store.image.trim().is_empty() {
            anyhow::bail!("Store image cannot be empty");
        }

        // Docker refuses anything under 6MB
        if self.store.limits.memory_mb < 6 {
            anyhow::bail!("Minimum memory limit is 6MB");
        }

        if self.store.connect_timeout_ms == 0 {
            anyhow::bail!("Connect timeout cannot be 0");
        }

        if self.store.engine_timeout_secs == 0 || self.store.command_timeout_secs == 0 {
            anyhow::bail!("Engine and command timeouts cannot be 0");
        }

        if self.store.max_exec_output_bytes == 0 {
            anyhow::bail!("Exec output limit cannot be 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.store.image, "redis:latest");
        assert_eq!(config.store.service_port, 6379);
        assert_eq!(config.store.execution_mode, ExecutionMode::Direct);
        assert_eq!(config.store.connect_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = AppConfig {
            port: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.store.limits.memory_mb = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.store.connect_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_execution_mode_from_file_syntax() {
        let store: StoreConfig = serde_yaml::from_str("execution_mode: exec_bridge").unwrap();
        assert_eq!(store.execution_mode, ExecutionMode::ExecBridge);
        assert_eq!(store.limits, ResourceLimits::default());
    }
}
