//! Test resolution and execution engine.
//!
//! Leaves first: argument resolution, dependency checks, executor dispatch
//! under a timeout supervisor, and cleanup. [`Engine`] composes them into a
//! single test run that yields one [`ExecutionResult`].

pub mod args;
pub mod cleanup;
pub mod deps;
pub mod error;
pub mod executor;
pub mod result;
pub mod runner;
pub mod supervisor;

pub use args::{expand_pairs, parse_pairs, resolve_arguments, ResolvedArguments};
pub use cleanup::{run_cleanup, CleanupOutcome, CleanupState};
pub use deps::{DependencyChecker, DependencyOutcome, DependencyState};
pub use error::ExecutionError;
pub use executor::{
    CommandRunner, ExecutorKind, Invocation, ProcessOutput, ProcessRunner, ProcessStatus,
    RunnerOptions, SCRATCH_DIR_ENV,
};
pub use result::{
    default_results_file, ExecutionResult, ExecutionStatus, ResultError, ResultFormat, ResultSink,
};
pub use runner::{CleanupPolicy, Engine, EngineOptions, TestPhase, TestSelector};
pub use supervisor::Supervisor;
