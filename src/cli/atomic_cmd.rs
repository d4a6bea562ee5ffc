// Copyright 2024-2026 atomic-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-test execution command.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{RunArgs, RunContext, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::config::RunnerConfig;
use crate::engine::{
    default_results_file, CleanupPolicy, Engine, EngineOptions, ExecutionResult, ResultSink,
};

/// Run one test of `technique_id` and write its result.
///
/// Returns 0 when the command ran to completion, 1 when the engine rejected
/// the test or it timed out, stayed unsatisfied or was interrupted, 2 on
/// usage errors.
pub async fn run_atomic(technique_id: &str, args: &RunArgs, config: &RunnerConfig, cancel: CancellationToken) -> i32 {
    let inputs = match args.parsed_inputs() {
        Ok(inputs) => inputs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let env = match args.parsed_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };

    let ctx = match RunContext::new(config, env, !args.quiet, cancel) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error creating scratch directory: {}", e);
            return EXIT_FAILURE;
        }
    };
    let options = EngineOptions {
        timeout: config.command_timeout,
        install_dependencies: args.get_prereqs,
        cleanup: if args.cleanup {
            CleanupPolicy::AfterExecution
        } else {
            CleanupPolicy::Skip
        },
        ..EngineOptions::default()
    };
    let engine = Engine::new(config.catalog(), ctx.runner.clone(), options);

    let started = Utc::now();
    let outcome = engine.execute(technique_id, &args.selector(), &inputs).await;
    ctx.finish();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };

    let sink = match &args.results_file {
        Some(path) => ResultSink::from_arg(path),
        None => ResultSink::File(default_results_file(technique_id, started, config.results_format)),
    };
    if let Err(e) = sink.write(&result, config.results_format) {
        eprintln!("Error: {}", e);
        return EXIT_FAILURE;
    }
    if !args.quiet {
        print_summary(&result, &sink);
    }

    if result.status.is_failure() {
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}

fn print_summary(result: &ExecutionResult, sink: &ResultSink) {
    eprintln!();
    eprintln!("Technique: {} - {}", result.technique_id, result.technique_name);
    eprintln!("Test:      {}", result.test_name);
    eprintln!("Status:    {}", result.status);
    for dep in &result.dependencies {
        eprintln!("  dependency {:?}: {}", dep.description, dep.state.as_str());
    }
    if let Some(cleanup) = &result.cleanup {
        eprintln!("Cleanup:   {}", cleanup.state.as_str());
    }
    if let Some(error) = &result.error {
        eprintln!("Error:     {}", error);
    }
    if let ResultSink::File(path) = sink {
        eprintln!("Results written to {}", path.display());
    }
}
