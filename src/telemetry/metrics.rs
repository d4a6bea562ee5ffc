//! Counters and histograms recorded through the `metrics` facade.
//!
//! Nothing here installs a recorder; without one every call is a no-op.

use std::time::Duration;

use crate::engine::{CleanupState, DependencyState, ExecutionStatus};

pub const TESTS_TOTAL: &str = "atomic_tests_total";
pub const TEST_DURATION_SECONDS: &str = "atomic_test_duration_seconds";
pub const DEPENDENCIES_TOTAL: &str = "atomic_dependencies_total";
pub const CLEANUPS_TOTAL: &str = "atomic_cleanups_total";
pub const CLEANUP_FAILURES_TOTAL: &str = "atomic_cleanup_failures_total";

/// One finished test run.
pub fn record_test(status: ExecutionStatus, elapsed: Duration) {
    metrics::counter!(TESTS_TOTAL, "status" => status.label()).increment(1);
    if status != ExecutionStatus::SignaturesOnly {
        metrics::histogram!(TEST_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }
}

pub fn record_dependency(state: DependencyState) {
    metrics::counter!(DEPENDENCIES_TOTAL, "state" => state.as_str()).increment(1);
}

pub fn record_cleanup(state: CleanupState) {
    metrics::counter!(CLEANUPS_TOTAL, "state" => state.as_str()).increment(1);
    if state == CleanupState::Failed {
        metrics::counter!(CLEANUP_FAILURES_TOTAL).increment(1);
    }
}
