//! Best-effort cleanup of a test's side effects.
//!
//! Cleanup runs under the test's primary executor. Failures are recorded and
//! logged, never escalated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::args::ResolvedArguments;
use super::executor::{CommandRunner, ExecutorKind, Invocation};
use crate::catalog::AtomicTestSpec;
use crate::telemetry;

/// How a cleanup attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupState {
    /// No cleanup command declared; counts as success.
    NotDeclared,
    Succeeded,
    /// Manual executor; the operator must undo the test by hand.
    Manual,
    Failed,
}

impl CleanupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDeclared => "not_declared",
            Self::Succeeded => "succeeded",
            Self::Manual => "manual",
            Self::Failed => "failed",
        }
    }
}

/// Record of one cleanup attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub technique_id: String,
    pub test: String,
    pub state: CleanupState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleanupOutcome {
    /// A cleanup that could not be attempted at all.
    pub fn failed(technique_id: &str, test: &str, error: impl ToString) -> Self {
        Self {
            technique_id: technique_id.to_string(),
            test: test.to_string(),
            state: CleanupState::Failed,
            command: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.state == CleanupState::Failed
    }
}

/// Interpolate and run `test`'s cleanup command.
pub async fn run_cleanup<R: CommandRunner + ?Sized>(
    runner: &R,
    technique_id: &str,
    test: &AtomicTestSpec,
    args: &ResolvedArguments,
    timeout: Option<Duration>,
) -> CleanupOutcome {
    let outcome = attempt(runner, technique_id, test, args, timeout).await;
    telemetry::record_cleanup(outcome.state);
    if let Some(error) = &outcome.error {
        tracing::warn!(technique = %technique_id, test = %test.name, error = %error, "cleanup failed");
    } else {
        tracing::debug!(technique = %technique_id, test = %test.name, state = outcome.state.as_str(), "cleanup finished");
    }
    outcome
}

async fn attempt<R: CommandRunner + ?Sized>(
    runner: &R,
    technique_id: &str,
    test: &AtomicTestSpec,
    args: &ResolvedArguments,
    timeout: Option<Duration>,
) -> CleanupOutcome {
    let mut outcome = CleanupOutcome {
        technique_id: technique_id.to_string(),
        test: test.name.clone(),
        state: CleanupState::NotDeclared,
        command: None,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        error: None,
    };
    let Some(template) = test.executor.cleanup_command.as_deref().filter(|c| !c.trim().is_empty()) else {
        return outcome;
    };

    let executor = match test.executor.name.parse::<ExecutorKind>() {
        Ok(kind) => kind,
        Err(e) => return CleanupOutcome::failed(technique_id, &test.name, e),
    };
    let command = match args.interpolate(template) {
        Ok(command) => command,
        Err(e) => return CleanupOutcome::failed(technique_id, &test.name, e),
    };
    outcome.command = Some(command.clone());

    if !executor.spawns() {
        tracing::info!(test = %test.name, cleanup = %command, "manual cleanup required");
        outcome.state = CleanupState::Manual;
        return outcome;
    }

    match runner
        .run(&Invocation::new(executor, command, timeout).uninterruptible())
        .await
    {
        Ok(out) => {
            outcome.exit_code = out.status.code();
            outcome.stdout = out.stdout;
            outcome.stderr = out.stderr;
            if out.status.success() {
                outcome.state = CleanupState::Succeeded;
            } else {
                outcome.state = CleanupState::Failed;
                outcome.error = Some(match out.status.code() {
                    Some(code) => format!("cleanup command exited with {}", code),
                    None => "cleanup command was terminated".to_string(),
                });
            }
        }
        Err(e) => {
            outcome.state = CleanupState::Failed;
            outcome.error = Some(e.to_string());
        }
    }
    outcome
}
