//! atomic-runner
//!
//! Resolves and executes atomic tests: small, self-contained command
//! sequences that emulate one adversary technique on the local host.
//!
//! # Layers
//!
//! - **catalog**: technique definitions and emulation plans, read from
//!   local, custom and bundled directory tiers
//! - **engine**: argument resolution, dependency checks, supervised
//!   execution and cleanup for one test
//! - **emulation**: ordered multi-technique runs with deferred cleanup
//! - **process**: process-tree containment so a timeout or interrupt takes
//!   down every descendant
//!
//! # Safety Boundaries
//!
//! Commands run with the privileges of the invoking user, inside a
//! run-scoped scratch directory that is removed afterwards. Nothing is sent
//! over the network by the runner itself.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod emulation;
pub mod engine;
pub mod process;
pub mod scratch;
pub mod telemetry;

pub use catalog::{CatalogError, EmulationPlan, FileCatalog, LoadedTechnique, TechniqueSource};
pub use config::RunnerConfig;
pub use emulation::{EmulationOrchestrator, EmulationReport};
pub use engine::{
    CommandRunner, Engine, EngineOptions, ExecutionError, ExecutionResult, ExecutionStatus,
    ProcessRunner, TestSelector,
};
pub use scratch::ScratchDir;
