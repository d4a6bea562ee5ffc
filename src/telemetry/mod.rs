//! Structured logging, per-test spans and metrics.
//!
//! All output is local (stderr or a file). No recorder or exporter is
//! installed by the library.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_cleanup, record_dependency, record_test, CLEANUPS_TOTAL, CLEANUP_FAILURES_TOTAL,
    DEPENDENCIES_TOTAL, TESTS_TOTAL, TEST_DURATION_SECONDS,
};
pub use spans::{EmulationSpan, SpanExt, TestSpan};
