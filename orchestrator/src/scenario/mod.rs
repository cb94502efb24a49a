//! Session scenario descriptors
//!
//! A scenario is a declarative document with a name and an ordered list of
//! steps. The lifecycle core only reads the name and counts the steps; the
//! step bodies are carried through to callers untouched.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scenario attached to a session at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub steps: Vec<Value>,
}

impl Scenario {
    /// Load a scenario from a YAML (or JSON) file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;

        Self::parse(&raw).with_context(|| format!("Invalid scenario file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(raw)?;
        if scenario.name.trim().is_empty() {
            anyhow::bail!("Scenario name cannot be empty");
        }
        Ok(scenario)
    }

    /// Step descriptor at `index`, if the scenario has one
    pub fn step(&self, index: usize) -> Option<&Value> {
        self.steps.get(index)
    }
}
