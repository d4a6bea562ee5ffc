//! Span utilities and extension traits.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    /// Record the state-machine phase the test has entered.
    fn record_phase(&self, phase: &str);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_phase(&self, phase: &str) {
        self.record("phase", phase);
    }
}

/// Factory for per-test spans.
pub struct TestSpan;

impl TestSpan {
    /// Fields filled in later: `phase`, `status`, `outcome`,
    /// `error.message`, `latency_ms`.
    pub fn new(technique: &str, test: &str, guid: Option<&str>) -> Span {
        info_span!(
            "atomic_test",
            technique = %technique,
            test = %test,
            guid = guid.unwrap_or(""),
            phase = tracing::field::Empty,
            status = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}

/// Factory for the span wrapping a whole emulation plan.
pub struct EmulationSpan;

impl EmulationSpan {
    pub fn new(tests: usize, cleanup_enabled: bool) -> Span {
        info_span!(
            "emulation",
            tests,
            cleanup_enabled,
            failures = tracing::field::Empty,
            cleanup_failures = tracing::field::Empty,
        )
    }
}
