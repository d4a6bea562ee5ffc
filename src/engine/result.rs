//! Execution results and their on-disk encodings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::cleanup::CleanupOutcome;
use super::deps::DependencyOutcome;
use crate::catalog::Provenance;

/// Terminal status of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The command ran to completion.
    Exited { code: i32 },
    /// The command was killed by a signal.
    Terminated,
    /// The deadline expired and the process tree was killed.
    TimedOut { timeout_ms: u64 },
    /// The interpreter could not be started.
    SpawnFailed,
    /// Manual executor; no automated pass/fail judgment.
    Manual,
    /// A dependency stayed unsatisfied; the command never ran.
    Unsatisfied,
    /// Operator interrupt.
    Interrupted,
    /// Signatures recorded without executing.
    SignaturesOnly,
}

impl ExecutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exited { .. } => "exited",
            Self::Terminated => "terminated",
            Self::TimedOut { .. } => "timed_out",
            Self::SpawnFailed => "spawn_failed",
            Self::Manual => "manual",
            Self::Unsatisfied => "unsatisfied",
            Self::Interrupted => "interrupted",
            Self::SignaturesOnly => "signatures_only",
        }
    }

    /// Whether the test did not get to run its command to completion.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TimedOut { .. }
                | Self::SpawnFailed
                | Self::Unsatisfied
                | Self::Interrupted
                | Self::Terminated
        )
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {}", code),
            Self::TimedOut { timeout_ms } => {
                write!(f, "timed out after {:?}", Duration::from_millis(*timeout_ms))
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Record of one test run. Built once by the engine and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub technique_id: String,
    pub technique_name: String,
    pub test_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_guid: Option<String>,
    pub provenance: Provenance,
    pub definition_sha256: String,
    pub hostname: String,
    pub executor: String,
    pub inputs: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyOutcome>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupOutcome>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// GUID when known, otherwise the test name.
    pub fn test_key(&self) -> &str {
        self.test_guid.as_deref().unwrap_or(&self.test_name)
    }
}

/// Errors writing results.
#[derive(Debug, Error)]
pub enum ResultError {
    #[error("Unknown results format: {0} (expected json or yaml)")]
    UnknownFormat(String),

    #[error("Failed to encode results: {0}")]
    Encode(String),

    #[error("Failed to write results to {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Serialization format for results files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFormat {
    Json,
    #[default]
    Yaml,
}

impl ResultFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String, ResultError> {
        match self {
            Self::Json => serde_json::to_string_pretty(value).map_err(|e| ResultError::Encode(e.to_string())),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| ResultError::Encode(e.to_string())),
        }
    }
}

impl FromStr for ResultFormat {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(ResultError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Default results file name for a run of `technique_id` started at `at`.
///
/// Colons in the timestamp are replaced so the name is valid on Windows.
pub fn default_results_file(technique_id: &str, at: DateTime<Utc>, format: ResultFormat) -> PathBuf {
    let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', ".");
    PathBuf::from(format!(
        "atomic-test-executor-execution-{}-{}.{}",
        technique_id,
        stamp,
        format.extension()
    ))
}

/// Where encoded results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSink {
    Stdout,
    File(PathBuf),
}

impl ResultSink {
    /// `-` selects stdout.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(arg))
        }
    }

    pub fn write<T: Serialize>(&self, value: &T, format: ResultFormat) -> Result<(), ResultError> {
        let body = format.encode(value)?;
        match self {
            Self::Stdout => {
                println!("{}", body);
                Ok(())
            }
            Self::File(path) => write_file(path, &body),
        }
    }
}

fn write_file(path: &Path, body: &str) -> Result<(), ResultError> {
    std::fs::write(path, body).map_err(|e| ResultError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
