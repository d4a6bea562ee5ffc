//! Dependency prerequisite checking.
//!
//! Each dependency's check runs under the test's dependency executor. When a
//! check fails, installation is enabled, and a get-prerequisite command is
//! declared, the install runs exactly once and the check is repeated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::args::ResolvedArguments;
use super::error::ExecutionError;
use super::executor::{CommandRunner, ExecutorKind, Invocation};
use crate::catalog::AtomicTestSpec;
use crate::telemetry;

/// Final state of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
    Satisfied,
    SatisfiedAfterInstall,
    Unsatisfied,
}

impl DependencyState {
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, Self::Unsatisfied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::SatisfiedAfterInstall => "satisfied_after_install",
            Self::Unsatisfied => "unsatisfied",
        }
    }
}

/// Recorded outcome of checking one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyOutcome {
    pub description: String,
    pub state: DependencyState,
    /// Exit code of the last check, when one ran to completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_exit: Option<i32>,
    pub install_attempted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A dependency with its commands already interpolated.
#[derive(Debug, Clone)]
pub struct PreparedDependency {
    pub description: String,
    pub check: String,
    pub install: Option<String>,
}

/// Interpolate every dependency command of `test`.
///
/// Runs during resolution so an unbound placeholder fails the test before
/// anything is spawned.
pub fn prepare(test: &AtomicTestSpec, args: &ResolvedArguments) -> Result<Vec<PreparedDependency>, ExecutionError> {
    test.dependencies
        .iter()
        .map(|dep| {
            Ok(PreparedDependency {
                description: dep.description.trim().to_string(),
                check: args.interpolate(&dep.prereq_command)?,
                install: dep
                    .get_prereq_command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| args.interpolate(c))
                    .transpose()?,
            })
        })
        .collect()
}

/// Runs dependency checks for one test.
pub struct DependencyChecker<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    executor: ExecutorKind,
    timeout: Option<Duration>,
    install: bool,
}

impl<'a, R: CommandRunner + ?Sized> DependencyChecker<'a, R> {
    pub fn new(runner: &'a R, executor: ExecutorKind, timeout: Option<Duration>, install: bool) -> Self {
        Self {
            runner,
            executor,
            timeout,
            install,
        }
    }

    /// Check every dependency, in order.
    ///
    /// All dependencies are checked even after one is unsatisfied. Only an
    /// operator interrupt stops the pass early.
    pub async fn check_all(&self, deps: &[PreparedDependency]) -> Result<Vec<DependencyOutcome>, ExecutionError> {
        let mut outcomes = Vec::with_capacity(deps.len());
        for dep in deps {
            let outcome = self.check_one(dep).await?;
            telemetry::record_dependency(outcome.state);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn check_one(&self, dep: &PreparedDependency) -> Result<DependencyOutcome, ExecutionError> {
        let mut outcome = DependencyOutcome {
            description: dep.description.clone(),
            state: DependencyState::Satisfied,
            check_exit: None,
            install_attempted: false,
            error: None,
        };
        // Prerequisites of manual tests cannot be checked automatically.
        if !self.executor.spawns() || dep.check.is_empty() {
            return Ok(outcome);
        }

        if self.run_check(dep, &mut outcome).await? {
            return Ok(outcome);
        }

        match (&dep.install, self.install) {
            (Some(install), true) => {
                tracing::info!(dependency = %dep.description, "prerequisite missing; running install command");
                outcome.install_attempted = true;
                match self.runner.run(&Invocation::new(self.executor, install.as_str(), self.timeout)).await {
                    Ok(out) if !out.status.success() => {
                        tracing::warn!(dependency = %dep.description, exit = ?out.status.code(), "install command failed");
                    }
                    Ok(_) => {}
                    Err(e @ ExecutionError::Interrupted { .. }) => return Err(e),
                    Err(e) => tracing::warn!(dependency = %dep.description, error = %e, "install command failed"),
                }
                outcome.error = None;
                if self.run_check(dep, &mut outcome).await? {
                    outcome.state = DependencyState::SatisfiedAfterInstall;
                    return Ok(outcome);
                }
            }
            (Some(_), false) => {
                tracing::info!(dependency = %dep.description, "prerequisite missing; install disabled");
            }
            (None, _) => {
                tracing::info!(dependency = %dep.description, "prerequisite missing; no install command declared");
            }
        }

        outcome.state = DependencyState::Unsatisfied;
        Ok(outcome)
    }

    /// Run the check command; `true` when it exits 0.
    async fn run_check(&self, dep: &PreparedDependency, outcome: &mut DependencyOutcome) -> Result<bool, ExecutionError> {
        match self.runner.run(&Invocation::new(self.executor, dep.check.as_str(), self.timeout)).await {
            Ok(out) => {
                outcome.check_exit = out.status.code();
                Ok(out.status.success())
            }
            Err(e @ ExecutionError::Interrupted { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(dependency = %dep.description, error = %e, "prerequisite check did not complete");
                outcome.check_exit = None;
                outcome.error = Some(e.to_string());
                Ok(false)
            }
        }
    }
}

/// Descriptions of the unsatisfied dependencies, in order.
pub fn unsatisfied(outcomes: &[DependencyOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|o| !o.state.is_satisfied())
        .map(|o| o.description.clone())
        .collect()
}
