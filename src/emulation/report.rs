//! Aggregate outcome of one emulation plan.

use serde::{Deserialize, Serialize};

use crate::engine::{CleanupOutcome, ExecutionError, ExecutionResult};

/// A test that ended without producing a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub technique_id: String,
    pub test: String,
    pub error: String,
}

impl TestFailure {
    pub fn new(technique_id: &str, test: &str, error: &ExecutionError) -> Self {
        Self {
            technique_id: technique_id.to_string(),
            test: test.to_string(),
            error: error.to_string(),
        }
    }
}

/// Results in plan order, per-test errors, and cleanup attempts in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulationReport {
    pub results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TestFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanups: Vec<CleanupOutcome>,
    #[serde(default)]
    pub interrupted: bool,
}

impl EmulationReport {
    pub fn cleanup_errors(&self) -> impl Iterator<Item = &CleanupOutcome> {
        self.cleanups.iter().filter(|c| c.is_failure())
    }

    /// Results whose status means the command did not run to completion.
    pub fn failed_results(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
            || self.cleanup_errors().next().is_some()
            || self.failed_results().next().is_some()
            || self.interrupted
    }
}
