// Copyright 2024-2026 atomic-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Emulation plan command.

use std::path::Path;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{RunArgs, RunContext, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::config::RunnerConfig;
use crate::emulation::{EmulationOrchestrator, EmulationReport};
use crate::engine::{default_results_file, Engine, EngineOptions, ResultSink};

/// Run the plan at `plan_path` and write the aggregate report.
///
/// A plan that fails to load is fatal. Otherwise every enabled test is
/// attempted and the exit code reflects whether anything failed.
pub async fn run_emulation(plan_path: &Path, args: &RunArgs, config: &RunnerConfig, cancel: CancellationToken) -> i32 {
    let env = match args.parsed_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let ctx = match RunContext::new(config, env, !args.quiet, cancel.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error creating scratch directory: {}", e);
            return EXIT_FAILURE;
        }
    };
    let options = EngineOptions {
        timeout: config.command_timeout,
        install_dependencies: args.get_prereqs,
        ..EngineOptions::default()
    };
    let engine = Engine::new(config.catalog(), ctx.runner.clone(), options);
    let orchestrator = EmulationOrchestrator::new(engine, cancel);

    let started = Utc::now();
    let outcome = orchestrator.run_file(plan_path).await;
    ctx.finish();

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };

    let sink = match &args.results_file {
        Some(path) => ResultSink::from_arg(path),
        None => ResultSink::File(default_results_file("emulation", started, config.results_format)),
    };
    if let Err(e) = sink.write(&report, config.results_format) {
        eprintln!("Error: {}", e);
        return EXIT_FAILURE;
    }
    print_summary(&report, &sink);

    if report.has_failures() {
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}

fn print_summary(report: &EmulationReport, sink: &ResultSink) {
    eprintln!();
    for result in &report.results {
        eprintln!("{} / {}: {}", result.technique_id, result.test_name, result.status);
    }
    for failure in &report.failures {
        eprintln!("{} / {}: error: {}", failure.technique_id, failure.test, failure.error);
    }
    for cleanup in report.cleanup_errors() {
        eprintln!(
            "{} / {}: cleanup failed: {}",
            cleanup.technique_id,
            cleanup.test,
            cleanup.error.as_deref().unwrap_or("unknown error")
        );
    }
    if report.interrupted {
        eprintln!("Run was interrupted; remaining tests were not scheduled.");
    }
    if let ResultSink::File(path) = sink {
        eprintln!("Report written to {}", path.display());
    }
}
