//! Test execution engine.
//!
//! One test run walks `Resolving -> CheckingDependencies -> Executing ->
//! CleaningUp -> Done`. Binding and configuration errors end the run in
//! `Resolving` and surface to the caller. Unsatisfied dependencies, timeouts
//! and interrupts are captured in the returned [`ExecutionResult`].

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::Instrument;
use uuid::Uuid;

use super::args::{resolve_arguments, ResolvedArguments};
use super::cleanup::{run_cleanup, CleanupOutcome};
use super::deps::{self, DependencyChecker, DependencyOutcome};
use super::error::ExecutionError;
use super::executor::{CommandRunner, ExecutorKind, Invocation, ProcessStatus};
use super::result::{ExecutionResult, ExecutionStatus};
use crate::catalog::{AtomicTestSpec, LoadedTechnique, TechniqueSource};
use crate::process;
use crate::telemetry::{self, SpanExt, TestSpan};

/// State-machine phase of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Resolving,
    CheckingDependencies,
    Executing,
    CleaningUp,
    Done,
}

impl TestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::CheckingDependencies => "checking_dependencies",
            Self::Executing => "executing",
            Self::CleaningUp => "cleaning_up",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the engine itself runs a test's cleanup command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Never; a caller such as the orchestrator cleans up later.
    #[default]
    Skip,
    /// After the command ran, whatever its outcome.
    AfterExecution,
    /// Also when execution was skipped for unsatisfied dependencies.
    Always,
}

/// Per-run engine settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Per-command deadline. `None` waits without a ceiling.
    pub timeout: Option<Duration>,
    /// Run get-prerequisite commands for failing checks.
    pub install_dependencies: bool,
    pub cleanup: CleanupPolicy,
    /// Host platform matched against `supported_platforms`.
    pub platform: String,
    /// Recorded in every result.
    pub hostname: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            install_dependencies: false,
            cleanup: CleanupPolicy::Skip,
            platform: process::host_platform().to_string(),
            hostname: local_hostname(),
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// How a caller picks one test out of a technique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSelector {
    pub name: Option<String>,
    pub index: Option<usize>,
    pub guid: Option<String>,
}

impl TestSelector {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_index(index: usize) -> Self {
        Self {
            index: Some(index),
            ..Self::default()
        }
    }

    pub fn by_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.index.is_none() && self.guid.is_none()
    }

    /// GUID first, then name, then index.
    pub fn select<'a>(&self, technique: &'a LoadedTechnique) -> Result<&'a AtomicTestSpec, ExecutionError> {
        let definition = &technique.definition;
        if let Some((_, test)) = definition.find_test(self.name.as_deref(), self.guid.as_deref()) {
            return Ok(test);
        }
        if let Some(test) = self.index.and_then(|i| definition.atomic_tests.get(i)) {
            return Ok(test);
        }
        Err(ExecutionError::TestNotFound {
            technique: technique.id().to_string(),
            selector: self.to_string(),
        })
    }
}

impl fmt::Display for TestSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(guid) = &self.guid {
            parts.push(format!("guid={}", guid));
        }
        if let Some(name) = &self.name {
            parts.push(format!("name={}", name));
        }
        if let Some(index) = self.index {
            parts.push(format!("index={}", index));
        }
        if parts.is_empty() {
            f.write_str("<none>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Composes resolution, dependency checks, dispatch and cleanup for one test.
pub struct Engine<S, R> {
    source: S,
    runner: R,
    options: EngineOptions,
}

/// Everything resolved before a process is spawned.
struct Prepared {
    executor: ExecutorKind,
    dependency_executor: ExecutorKind,
    args: ResolvedArguments,
    command: String,
    dependencies: Vec<deps::PreparedDependency>,
}

impl<S: TechniqueSource, R: CommandRunner> Engine<S, R> {
    pub fn new(source: S, runner: R, options: EngineOptions) -> Self {
        Self { source, runner, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Load a technique from the configured source.
    pub fn load(&self, technique_id: &str) -> Result<LoadedTechnique, ExecutionError> {
        Ok(self.source.load(technique_id)?)
    }

    /// Load `technique_id` and run the selected test with the engine's options.
    pub async fn execute(
        &self,
        technique_id: &str,
        selector: &TestSelector,
        inputs: &IndexMap<String, String>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let technique = self.load(technique_id)?;
        let test = selector.select(&technique)?;
        self.execute_test(&technique, test, inputs, &self.options).await
    }

    /// Run one test of an already loaded technique.
    pub async fn execute_test(
        &self,
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        inputs: &IndexMap<String, String>,
        options: &EngineOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        let span = TestSpan::new(technique.id(), &test.name, test.guid.as_deref());
        let started = Instant::now();
        let result = self
            .run_phases(technique, test, inputs, options)
            .instrument(span.clone())
            .await;

        span.record_phase(TestPhase::Done.as_str());
        span.record_result(&result);
        span.record("latency_ms", started.elapsed().as_millis() as u64);
        if let Ok(res) = &result {
            span.record("outcome", res.status.label());
            telemetry::record_test(res.status, started.elapsed());
        }
        result
    }

    async fn run_phases(
        &self,
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        inputs: &IndexMap<String, String>,
        options: &EngineOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        let span = tracing::Span::current();
        let started_at = Utc::now();

        span.record_phase(TestPhase::Resolving.as_str());
        let prepared = self.prepare(technique, test, inputs, options)?;
        let mut result = ResultBuilder::new(technique, test, &prepared, options, started_at);

        span.record_phase(TestPhase::CheckingDependencies.as_str());
        let checker = DependencyChecker::new(
            &self.runner,
            prepared.dependency_executor,
            options.timeout,
            options.install_dependencies,
        );
        match checker.check_all(&prepared.dependencies).await {
            Ok(outcomes) => result.dependencies = outcomes,
            Err(ExecutionError::Interrupted { .. }) => {
                return Ok(result.finish(ExecutionStatus::Interrupted, Some("interrupted during dependency checks".into())));
            }
            Err(e) => return Err(e),
        }

        let unsatisfied = deps::unsatisfied(&result.dependencies);
        if !unsatisfied.is_empty() {
            let err = ExecutionError::UnsatisfiedDependency {
                test: test.name.clone(),
                unsatisfied,
            };
            tracing::warn!(error = %err, "skipping execution");
            if options.cleanup == CleanupPolicy::Always {
                span.record_phase(TestPhase::CleaningUp.as_str());
                result.cleanup = Some(self.cleanup(technique, test, &prepared.args, options).await);
            }
            return Ok(result.finish(ExecutionStatus::Unsatisfied, Some(err.to_string())));
        }

        span.record_phase(TestPhase::Executing.as_str());
        if prepared.executor == ExecutorKind::Manual {
            let steps = test.executor.steps.as_deref().unwrap_or(&prepared.command);
            tracing::info!(steps = %steps, "manual test; follow the steps by hand");
        }
        let invocation = Invocation::new(prepared.executor, prepared.command.as_str(), options.timeout);
        let (status, error) = match self.runner.run(&invocation).await {
            Ok(out) => {
                result.stdout = out.stdout;
                result.stderr = out.stderr;
                let status = match out.status {
                    ProcessStatus::Exited { code } => ExecutionStatus::Exited { code },
                    ProcessStatus::Terminated => ExecutionStatus::Terminated,
                    ProcessStatus::Manual => ExecutionStatus::Manual,
                };
                (status, None)
            }
            Err(ExecutionError::ExecutionTimeout { timeout, stdout, stderr }) => {
                result.stdout = stdout;
                result.stderr = stderr;
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                let status = ExecutionStatus::TimedOut { timeout_ms };
                (status, Some(format!("command {}", status)))
            }
            Err(ExecutionError::Interrupted { stdout, stderr }) => {
                result.stdout = stdout;
                result.stderr = stderr;
                (ExecutionStatus::Interrupted, Some("interrupted by operator".to_string()))
            }
            Err(e) => {
                tracing::error!(error = %e, "command could not be started");
                (ExecutionStatus::SpawnFailed, Some(e.to_string()))
            }
        };

        if options.cleanup != CleanupPolicy::Skip {
            span.record_phase(TestPhase::CleaningUp.as_str());
            result.cleanup = Some(self.cleanup(technique, test, &prepared.args, options).await);
        }
        Ok(result.finish(status, error))
    }

    /// Everything that can fail without spawning a process.
    fn prepare(
        &self,
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        inputs: &IndexMap<String, String>,
        options: &EngineOptions,
    ) -> Result<Prepared, ExecutionError> {
        if !test.supported_platforms.is_empty() && !test.supports_platform(&options.platform) {
            return Err(ExecutionError::UnsupportedPlatform {
                test: test.name.clone(),
                platform: options.platform.clone(),
            });
        }
        let executor: ExecutorKind = test.executor.name.parse()?;
        let dependency_executor: ExecutorKind = test.dependency_executor().parse()?;
        if test.executor.elevation_required && executor.spawns() && !self.runner.is_elevated() {
            return Err(ExecutionError::ElevationRequired { test: test.name.clone() });
        }

        let args = resolve_arguments(test, inputs, &technique.base_dir)?;
        let command = args.interpolate(&test.executor.command)?;
        let dependencies = deps::prepare(test, &args)?;
        tracing::debug!(executor = %executor, arguments = args.as_map().len(), "resolved");
        Ok(Prepared {
            executor,
            dependency_executor,
            args,
            command,
            dependencies,
        })
    }

    async fn cleanup(
        &self,
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        args: &ResolvedArguments,
        options: &EngineOptions,
    ) -> CleanupOutcome {
        run_cleanup(&self.runner, technique.id(), test, args, options.timeout).await
    }

    /// Re-resolve `inputs` and run only the cleanup command of `test`.
    ///
    /// Never fails: resolution errors are reported inside the outcome.
    pub async fn cleanup_test(
        &self,
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        inputs: &IndexMap<String, String>,
        options: &EngineOptions,
    ) -> CleanupOutcome {
        let declared = test
            .executor
            .cleanup_command
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !declared {
            return self.cleanup(technique, test, &ResolvedArguments::default(), options).await;
        }
        let spawns = test
            .executor
            .name
            .parse::<ExecutorKind>()
            .map_or(true, |kind| kind.spawns());
        if test.executor.elevation_required && spawns && !self.runner.is_elevated() {
            let err = ExecutionError::ElevationRequired { test: test.name.clone() };
            let outcome = CleanupOutcome::failed(technique.id(), &test.name, err);
            telemetry::record_cleanup(outcome.state);
            return outcome;
        }
        match resolve_arguments(test, inputs, &technique.base_dir) {
            Ok(args) => self.cleanup(technique, test, &args, options).await,
            Err(e) => {
                tracing::warn!(technique = %technique.id(), test = %test.name, error = %e, "cannot resolve cleanup arguments");
                let outcome = CleanupOutcome::failed(technique.id(), &test.name, e);
                telemetry::record_cleanup(outcome.state);
                outcome
            }
        }
    }

    /// Record `test`'s signatures without executing anything.
    ///
    /// `signatures` replaces the test's declared signatures when given.
    pub fn signatures_only(
        &self,
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        signatures: Option<&[String]>,
        options: &EngineOptions,
    ) -> ExecutionResult {
        let now = Utc::now();
        let result = ExecutionResult {
            run_id: Uuid::new_v4(),
            technique_id: technique.id().to_string(),
            technique_name: technique.definition.display_name.clone(),
            test_name: test.name.clone(),
            test_guid: test.guid.clone(),
            provenance: technique.provenance,
            definition_sha256: technique.sha256.clone(),
            hostname: options.hostname.clone(),
            executor: test.executor.name.clone(),
            inputs: IndexMap::new(),
            command: String::new(),
            dependencies: Vec::new(),
            status: ExecutionStatus::SignaturesOnly,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            signatures: signatures.map(<[String]>::to_vec).unwrap_or_else(|| test.signatures.clone()),
            cleanup: None,
            started_at: now,
            ended_at: now,
        };
        telemetry::record_test(result.status, Duration::ZERO);
        result
    }
}

/// Accumulates result fields across phases; `finish` builds the record once.
struct ResultBuilder {
    draft: ExecutionResult,
    dependencies: Vec<DependencyOutcome>,
    stdout: String,
    stderr: String,
    cleanup: Option<CleanupOutcome>,
}

impl ResultBuilder {
    fn new(
        technique: &LoadedTechnique,
        test: &AtomicTestSpec,
        prepared: &Prepared,
        options: &EngineOptions,
        started_at: chrono::DateTime<Utc>,
    ) -> Self {
        let draft = ExecutionResult {
            run_id: Uuid::new_v4(),
            technique_id: technique.id().to_string(),
            technique_name: technique.definition.display_name.clone(),
            test_name: test.name.clone(),
            test_guid: test.guid.clone(),
            provenance: technique.provenance,
            definition_sha256: technique.sha256.clone(),
            hostname: options.hostname.clone(),
            executor: prepared.executor.to_string(),
            inputs: prepared.args.as_map().clone(),
            command: prepared.command.clone(),
            dependencies: Vec::new(),
            status: ExecutionStatus::Unsatisfied,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            signatures: test.signatures.clone(),
            cleanup: None,
            started_at,
            ended_at: started_at,
        };
        Self {
            draft,
            dependencies: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            cleanup: None,
        }
    }

    fn finish(self, status: ExecutionStatus, error: Option<String>) -> ExecutionResult {
        ExecutionResult {
            dependencies: self.dependencies,
            status,
            stdout: self.stdout,
            stderr: self.stderr,
            error,
            cleanup: self.cleanup,
            ended_at: Utc::now(),
            ..self.draft
        }
    }
}
