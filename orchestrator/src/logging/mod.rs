//! Logging module for the storebox orchestrator
//!
//! Structured logging with tracing: pretty output on a terminal, JSON
//! otherwise, plus a JSON log file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::MakeWriterExt},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const SYSTEM_LOG_DIR: &str = "/var/log/storebox";
const LOCAL_LOG_DIR: &str = "./logs";
const LOG_FILE: &str = "orchestrator.log";

/// Map a configured level name to a tracing level; unknown names mean info
pub fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the logging/tracing system. `RUST_LOG` overrides `log_level`.
pub fn init_logging(log_level: &str) -> Result<()> {
    let level = parse_level(log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!("storebox_orchestrator={},tower_http={}", level, level))
        });

    let log_file = open_log_file()?;

    if stdout_is_terminal() {
        // Development: pretty colored output to stdout + JSON to file
        let stdout_layer = fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .pretty()
            .with_writer(std::io::stdout);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .with_writer(log_file.and(std::io::stderr.with_max_level(Level::ERROR)));

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        // Production: JSON output to both stdout and file
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .with_writer(log_file.and(std::io::stdout));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }

    Ok(())
}

/// Open the log file under the system log dir, falling back to ./logs
fn open_log_file() -> Result<File> {
    open_in(Path::new(SYSTEM_LOG_DIR)).or_else(|_| {
        open_in(Path::new(LOCAL_LOG_DIR)).context("Failed to open log file")
    })
}

fn open_in(dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(dir)?;
    OpenOptions::new().create(true).append(true).open(dir.join(LOG_FILE))
}

fn stdout_is_terminal() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: isatty only inspects the descriptor
        unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
