//! Execution error types.
//!
//! Binding and configuration errors are fatal to the single test and surface
//! to the caller. Dependency, spawn and timeout errors are captured into the
//! execution result so a plan can continue.

use std::time::Duration;

use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors that can occur while resolving or executing an atomic test.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Argument default cycle: {}", .chain.join(" -> "))]
    ArgumentCycle { chain: Vec<String> },

    #[error("Unbound argument placeholder: #{{{name}}}")]
    UnboundArgument { name: String },

    #[error("Malformed input pair (expected key=value): {0}")]
    MalformedInput(String),

    #[error("Invalid value for {kind} argument {name}: {value}")]
    InvalidArgumentValue {
        name: String,
        kind: String,
        value: String,
    },

    #[error("Test {test} requires elevated privileges")]
    ElevationRequired { test: String },

    #[error("Unsatisfied dependencies for {test}: {}", .unsatisfied.join("; "))]
    UnsatisfiedDependency {
        test: String,
        unsatisfied: Vec<String>,
    },

    #[error("Execution timed out after {:?}", .timeout)]
    ExecutionTimeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("Test {test} does not support platform {platform}")]
    UnsupportedPlatform { test: String, platform: String },

    #[error("Test not found in {technique}: {selector}")]
    TestNotFound { technique: String, selector: String },

    #[error("Failed to spawn {executor}: {reason}")]
    Spawn { executor: String, reason: String },

    #[error("Execution interrupted by operator")]
    Interrupted { stdout: String, stderr: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ExecutionError {
    /// Errors recorded inside an `ExecutionResult` instead of propagated.
    pub fn is_captured(&self) -> bool {
        matches!(
            self,
            Self::UnsatisfiedDependency { .. }
                | Self::ExecutionTimeout { .. }
                | Self::Interrupted { .. }
                | Self::Spawn { .. }
        )
    }

    /// Errors that end the current test before any process is spawned.
    pub fn is_fatal_to_test(&self) -> bool {
        matches!(
            self,
            Self::ArgumentCycle { .. }
                | Self::UnboundArgument { .. }
                | Self::MalformedInput(_)
                | Self::InvalidArgumentValue { .. }
                | Self::ElevationRequired { .. }
                | Self::UnknownExecutor(_)
                | Self::UnsupportedPlatform { .. }
                | Self::TestNotFound { .. }
                | Self::Catalog(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = ExecutionError::ArgumentCycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Argument default cycle: a -> b -> a");

        let err = ExecutionError::UnboundArgument { name: "target".into() };
        assert_eq!(err.to_string(), "Unbound argument placeholder: #{target}");

        let err = ExecutionError::ExecutionTimeout {
            timeout: Duration::from_secs(5),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Execution timed out after 5s");
    }

    #[test]
    fn classification() {
        assert!(ExecutionError::UnknownExecutor("zsh".into()).is_fatal_to_test());
        assert!(!ExecutionError::UnknownExecutor("zsh".into()).is_captured());
        let timeout = ExecutionError::ExecutionTimeout {
            timeout: Duration::from_secs(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(timeout.is_captured());
        assert!(!timeout.is_fatal_to_test());
        let spawn = ExecutionError::Spawn {
            executor: "powershell".into(),
            reason: "No such file or directory".into(),
        };
        assert!(spawn.is_captured());
    }
}
