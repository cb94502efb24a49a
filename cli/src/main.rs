//! storebox CLI - Command-line interface for the storebox orchestrator
//!
//! Starts sandbox sessions, runs store commands in them and ends them

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// storebox CLI - Disposable Redis sandboxes
#[derive(Parser)]
#[command(name = "storebox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for storebox - isolated Redis sandboxes on demand", long_about = None)]
struct Cli {
    /// storebox API URL
    #[arg(short, long, default_value = "http://127.0.0.1:5000", env = "STOREBOX_API_URL")]
    api_url: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new sandbox session
    Start {
        /// Scenario file (YAML or JSON); the server's default when omitted
        #[arg(short, long)]
        scenario: Option<PathBuf>,
    },

    /// Run a store command in a session
    Exec {
        /// Session ID
        session: String,

        /// Store command, e.g. SET
        command: String,

        /// Command arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// End a session and remove its sandbox
    End {
        /// Session ID
        session: String,
    },

    /// Show one session
    Show {
        /// Session ID
        session: String,
    },

    /// List live sessions
    List,

    /// Advance a session to its next scenario step
    Step {
        /// Session ID
        session: String,
    },

    /// Get server health status
    Health,
}

#[derive(Debug, Serialize)]
struct StartRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    args: &'a [String],
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: u64,
    execution_mode: String,
    engine_version: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = cli.api_url.trim_end_matches('/');

    match cli.command {
        Commands::Start { scenario } => {
            let scenario = scenario.map(|path| read_scenario(&path)).transpose()?;

            let response = client
                .post(format!("{}/api/v1/sessions", api))
                .json(&StartRequest { scenario })
                .send()
                .context("Failed to send request")?;
            let body = check(response, "Start")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                let started: StartResponse =
                    serde_json::from_value(body).context("Failed to parse response")?;
                println!("{} {}", "✓ Session started:".green(), started.session_id.bold());
                println!("{} {}", "  Scenario:".cyan(), started.name);
            }
        }

        Commands::Exec {
            session,
            command,
            args,
        } => {
            let response = client
                .post(format!("{}/api/v1/sessions/{}/commands", api, session))
                .json(&ExecRequest {
                    command: &command,
                    args: &args,
                })
                .send()
                .context("Failed to send request")?;

            if !response.status().is_success() {
                let error: Value = response.json().unwrap_or(Value::Null);
                let message = error["message"]
                    .as_str()
                    .or_else(|| error["error"].as_str())
                    .unwrap_or("Unknown error");
                println!("{} {}", "(error)".red().bold(), message);
                std::process::exit(1);
            }

            let body: Value = response.json().context("Failed to parse response")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_reply(&body["result"], 0);
            }
        }

        Commands::End { session } => {
            let response = client
                .delete(format!("{}/api/v1/sessions/{}", api, session))
                .send()
                .context("Failed to end session")?;
            check(response, "End")?;

            println!("{} {}", "✓ Session ended:".green(), session);
        }

        Commands::Show { session } => {
            let response = client
                .get(format!("{}/api/v1/sessions/{}", api, session))
                .send()
                .context("Failed to get session")?;
            let body = check(response, "Session request")?;

            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::List => {
            let response = client
                .get(format!("{}/api/v1/sessions", api))
                .send()
                .context("Failed to list sessions")?;
            let body = check(response, "List")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                let sessions = body.as_array().context("Invalid response")?;
                println!("{}", "Live sessions:".bright_cyan().bold());
                if sessions.is_empty() {
                    println!("  (none)");
                }
                for session in sessions {
                    println!(
                        "  {} {} port {} step {}/{} ({} commands)",
                        session["session_id"].as_str().unwrap_or("?").bold(),
                        session["name"].as_str().unwrap_or("?"),
                        session["host_port"],
                        session["step"],
                        session["total_steps"],
                        session["command_count"],
                    );
                }
            }
        }

        Commands::Step { session } => {
            let response = client
                .post(format!("{}/api/v1/sessions/{}/step", api, session))
                .send()
                .context("Failed to advance step")?;
            let body = check(response, "Step")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("{} {}/{}", "Step:".cyan(), body["step"], body["total_steps"]);
                match &body["current"] {
                    Value::Null => println!("{}", "  Scenario complete".green()),
                    step => println!("{}", serde_yaml::to_string(step)?),
                }
            }
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", api))
                .send()
                .context("Failed to get health")?;

            if !response.status().is_success() {
                anyhow::bail!("Health check failed: {}", response.status());
            }

            let health: HealthResponse = response.json().context("Failed to parse response")?;

            println!("{}", "storebox Orchestrator Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!(
                "{} {}",
                "Status:".cyan(),
                if health.status == "healthy" {
                    health.status.green()
                } else {
                    health.status.yellow()
                }
            );
            println!("{} {}", "Version:".cyan(), health.version);
            println!("{} {}s", "Uptime:".cyan(), health.uptime_seconds);
            println!("{} {}", "Active Sessions:".cyan(), health.active_sessions);
            println!("{} {}", "Execution Mode:".cyan(), health.execution_mode);
            println!(
                "{} {}",
                "Engine:".cyan(),
                health.engine_version.as_deref().unwrap_or("unreachable")
            );
        }
    }

    Ok(())
}

/// Parse a scenario file so malformed files fail before reaching the server
fn read_scenario(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("Invalid scenario file: {}", path.display()))
}

/// Fail with the server's message on a non-success status, else return the body
fn check(response: Response, action: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().unwrap_or_else(|_| "Unknown error".to_string());
        anyhow::bail!("{} failed ({}): {}", action, status, error_text);
    }
    response.json().context("Failed to parse response")
}

/// Print a command reply the way redis-cli does
fn print_reply(reply: &Value, depth: usize) {
    let indent = "   ".repeat(depth);
    match reply {
        Value::Null => println!("{}{}", indent, "(nil)".dimmed()),
        Value::Number(n) => println!("{}(integer) {}", indent, n),
        Value::String(s) => println!("{}\"{}\"", indent, s),
        Value::Array(items) if items.is_empty() => {
            println!("{}{}", indent, "(empty array)".dimmed())
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                print!("{}{}) ", indent, i + 1);
                match item {
                    Value::Array(_) | Value::Object(_) => {
                        println!();
                        print_reply(item, depth + 1);
                    }
                    _ => print_reply(item, 0),
                }
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                print!("{}{} => ", indent, key.bold());
                print_reply(value, 0);
            }
        }
        other => println!("{}{}", indent, other),
    }
}
