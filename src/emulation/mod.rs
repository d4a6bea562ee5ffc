//! Emulation plan orchestration.
//!
//! Tests run strictly in plan order, one at a time; later tests may rely on
//! side effects of earlier ones. A failing test is recorded and the pass
//! continues. When the plan enables cleanup, a second pass cleans up every
//! test that was scheduled, again without stopping on errors.

mod report;

use std::path::Path;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::catalog::{
    CatalogError, EmulationPlan, LoadedTechnique, PlanError, PlanTest, TechniqueSource,
};
use crate::engine::{
    expand_pairs, parse_pairs, CleanupOutcome, CleanupPolicy, CommandRunner, Engine, EngineOptions,
    ExecutionError, ExecutionResult, ExecutionStatus, TestSelector,
};
use crate::telemetry::EmulationSpan;

pub use report::{EmulationReport, TestFailure};

type TechniqueCache = IndexMap<String, Result<LoadedTechnique, CatalogError>>;

/// Runs an [`EmulationPlan`] through an [`Engine`].
pub struct EmulationOrchestrator<S, R> {
    engine: Engine<S, R>,
    cancel: CancellationToken,
}

impl<S: TechniqueSource, R: CommandRunner> EmulationOrchestrator<S, R> {
    /// `cancel` stops scheduling further tests; cleanup still runs.
    pub fn new(engine: Engine<S, R>, cancel: CancellationToken) -> Self {
        Self { engine, cancel }
    }

    pub fn engine(&self) -> &Engine<S, R> {
        &self.engine
    }

    /// Load a plan file and run it. Only plan loading can fail.
    pub async fn run_file(&self, path: &Path) -> Result<EmulationReport, PlanError> {
        let plan = EmulationPlan::load(path)?;
        Ok(self.run(&plan).await)
    }

    pub async fn run(&self, plan: &EmulationPlan) -> EmulationReport {
        let scheduled = plan.enabled_tests().count();
        let span = EmulationSpan::new(scheduled, plan.cleanup_enabled);
        let report = self.run_passes(plan).instrument(span.clone()).await;
        span.record("failures", report.failures.len());
        span.record("cleanup_failures", report.cleanup_errors().count());
        report
    }

    async fn run_passes(&self, plan: &EmulationPlan) -> EmulationReport {
        let options = EngineOptions {
            timeout: plan.command_timeout().or(self.engine.options().timeout),
            cleanup: CleanupPolicy::Skip,
            ..self.engine.options().clone()
        };
        let signatures_only = plan.signatures_only();
        let mut cache = TechniqueCache::new();
        let mut report = EmulationReport::default();
        let mut attempted: Vec<(&str, &PlanTest)> = Vec::new();

        for (technique, test) in plan.enabled_tests() {
            if self.cancel.is_cancelled() {
                tracing::warn!("interrupted; no further tests will be scheduled");
                report.interrupted = true;
                break;
            }
            let technique_id = technique.attack_technique.as_str();
            attempted.push((technique_id, test));
            tracing::info!(technique = %technique_id, test = %test.display_key(), "running test");

            let outcome = self
                .run_one(&mut cache, technique_id, test, &options, signatures_only)
                .await;
            match outcome {
                Ok(result) => {
                    let interrupted = result.status == ExecutionStatus::Interrupted;
                    report.results.push(result);
                    if interrupted {
                        tracing::warn!("interrupted; no further tests will be scheduled");
                        report.interrupted = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(technique = %technique_id, test = %test.display_key(), error = %e, "test failed");
                    report.failures.push(TestFailure::new(technique_id, test.display_key(), &e));
                }
            }
        }

        if plan.cleanup_enabled && !signatures_only {
            for (technique_id, test) in attempted {
                let outcome = self.cleanup_one(&mut cache, technique_id, test, &options).await;
                report.cleanups.push(outcome);
            }
        }

        if report.has_failures() {
            tracing::warn!(
                failures = report.failures.len(),
                cleanup_failures = report.cleanup_errors().count(),
                "emulation finished with failures"
            );
        } else {
            tracing::info!(tests = report.results.len(), "emulation finished");
        }
        report
    }

    async fn run_one(
        &self,
        cache: &mut TechniqueCache,
        technique_id: &str,
        test: &PlanTest,
        options: &EngineOptions,
        signatures_only: bool,
    ) -> Result<ExecutionResult, ExecutionError> {
        let technique = self.technique(cache, technique_id)?;
        let spec = selector(test).select(technique)?;
        if signatures_only {
            return Ok(self
                .engine
                .signatures_only(technique, spec, test.signatures.as_deref(), options));
        }
        let inputs = plan_inputs(test)?;
        self.engine.execute_test(technique, spec, &inputs, options).await
    }

    async fn cleanup_one(
        &self,
        cache: &mut TechniqueCache,
        technique_id: &str,
        test: &PlanTest,
        options: &EngineOptions,
    ) -> CleanupOutcome {
        let resolved = self.technique(cache, technique_id).and_then(|technique| {
            let spec = selector(test).select(technique)?;
            let inputs = plan_inputs(test)?;
            Ok((technique, spec, inputs))
        });
        match resolved {
            Ok((technique, spec, inputs)) => self.engine.cleanup_test(technique, spec, &inputs, options).await,
            Err(e) => {
                let outcome = CleanupOutcome::failed(technique_id, test.display_key(), e);
                crate::telemetry::record_cleanup(outcome.state);
                outcome
            }
        }
    }

    /// Load each technique once per plan; a failed load is remembered too.
    fn technique<'c>(&self, cache: &'c mut TechniqueCache, technique_id: &str) -> Result<&'c LoadedTechnique, ExecutionError> {
        cache
            .entry(technique_id.to_string())
            .or_insert_with(|| self.engine.source().load(technique_id))
            .as_ref()
            .map_err(|e| ExecutionError::Catalog(e.clone()))
    }
}

fn selector(test: &PlanTest) -> TestSelector {
    TestSelector {
        name: Some(test.name.clone()).filter(|n| !n.is_empty()),
        index: None,
        guid: test.guid.clone().filter(|g| !g.is_empty()),
    }
}

fn plan_inputs(test: &PlanTest) -> Result<IndexMap<String, String>, ExecutionError> {
    parse_pairs(&expand_pairs(&test.inputs.to_pairs()))
}
