//! Emulation plan files.
//!
//! A plan lists techniques and tests to run unattended, with a shared command
//! timeout and cleanup policy. Plans are read-only once loaded.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a plan. Fatal to the whole orchestration.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read emulation plan {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Emulation plan file is empty")]
    Empty,

    #[error("Invalid emulation plan: {0}")]
    Parse(String),
}

/// Ordered list of techniques plus run-wide policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulationPlan {
    #[serde(default)]
    pub atomics: Vec<PlanTechnique>,
    /// Per-command timeout in seconds. `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<u64>,
    #[serde(default)]
    pub cleanup_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures_only: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanTechnique {
    pub attack_technique: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub atomic_tests: Vec<PlanTest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanTest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub inputs: PlanInputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Vec<String>>,
}

/// Test inputs: either `key=value` strings or a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanInputs {
    Pairs(Vec<String>),
    Map(IndexMap<String, String>),
}

impl Default for PlanInputs {
    fn default() -> Self {
        Self::Pairs(Vec::new())
    }
}

impl PlanInputs {
    /// Normalize to `key=value` pairs.
    pub fn to_pairs(&self) -> Vec<String> {
        match self {
            Self::Pairs(pairs) => pairs.clone(),
            Self::Map(map) => map.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
        }
    }
}

impl PlanTest {
    /// Key used in logs and failure reports.
    pub fn display_key(&self) -> &str {
        self.guid
            .as_deref()
            .filter(|g| !g.is_empty())
            .unwrap_or(&self.name)
    }
}

impl EmulationPlan {
    /// Load a plan from a YAML file.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let body = std::fs::read(path).map_err(|e| PlanError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&body)
    }

    /// Parse plan bytes. A zero-byte document is a load error.
    pub fn from_slice(body: &[u8]) -> Result<Self, PlanError> {
        if body.is_empty() {
            return Err(PlanError::Empty);
        }
        serde_yaml::from_slice(body).map_err(|e| PlanError::Parse(e.to_string()))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn signatures_only(&self) -> bool {
        self.signatures_only.unwrap_or(false)
    }

    /// Enabled (technique, test) pairs in declared order.
    pub fn enabled_tests(&self) -> impl Iterator<Item = (&PlanTechnique, &PlanTest)> {
        self.atomics
            .iter()
            .filter(|t| !t.disabled)
            .flat_map(|t| t.atomic_tests.iter().filter(|x| !x.disabled).map(move |x| (t, x)))
    }
}
