//! Technique catalog and emulation plan loading.
//!
//! The engine only sees parsed definitions; which tier the bytes came from
//! is kept as a provenance tag for result correlation.

pub mod plan;
pub mod source;
pub mod technique;

use thiserror::Error;

pub use plan::{EmulationPlan, PlanError, PlanInputs, PlanTechnique, PlanTest};
pub use source::{FileCatalog, Provenance, TechniqueBytes, TechniqueSource};
pub use technique::{
    AtomicTestSpec, DependencySpec, ExecutorSpec, InputArgumentSpec, LoadedTechnique,
    TechniqueDefinition,
};

/// Errors looking up or parsing technique definitions.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Technique not found in any catalog tier: {0}")]
    NotFound(String),

    #[error("No bundled technique catalog available")]
    NoBundledCatalog,

    #[error("Catalog I/O error: {0}")]
    Io(String),

    #[error("Invalid technique definition: {0}")]
    Parse(String),
}
