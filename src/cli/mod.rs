// Copyright 2024-2026 atomic-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command-line surface.
//!
//! ## Usage
//!
//! ```bash
//! atomic-runner                                 # list available techniques
//! atomic-runner -t T1059.004                    # list the tests of a technique
//! atomic-runner -t T1059.004 -i 0 --input k=v   # run one test
//! atomic-runner -E plan.yaml                    # run an emulation plan
//! atomic-runner config show|defaults|validate
//! ```
//!
//! Flag strings are turned into typed values here; the engine never sees
//! them raw.

pub mod atomic_cmd;
pub mod catalog_cmd;
pub mod config_cmd;
pub mod emulation_cmd;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::config::{self, RunnerConfig};
use crate::engine::{
    expand_pairs, parse_pairs, ExecutionError, ProcessRunner, ResultFormat, RunnerOptions,
    TestSelector,
};
use crate::scratch::ScratchDir;
use crate::telemetry;

/// Exit code for success.
pub const EXIT_OK: i32 = 0;
/// A test or plan ran but did not succeed, or the engine rejected it.
pub const EXIT_FAILURE: i32 = 1;
/// Usage or configuration error.
pub const EXIT_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "atomic-runner", version)]
#[command(about = "Resolve and execute atomic tests for adversary-technique emulation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print built-in defaults
    Defaults,
    /// Validate the effective configuration (or a TOML file)
    Validate {
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

/// Flags for running a single test or an emulation plan.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Technique ID (e.g. T1059.004)
    #[arg(short = 't', long, value_name = "TID")]
    pub technique: Option<String>,

    /// Test name
    #[arg(short = 'n', long, conflicts_with = "index")]
    pub name: Option<String>,

    /// Test index within the technique
    #[arg(short = 'i', long)]
    pub index: Option<usize>,

    /// Test GUID; takes precedence over name and index
    #[arg(short = 'G', long)]
    pub guid: Option<String>,

    /// Input arguments as key=value (comma-separated lists allowed)
    #[arg(long = "input", value_name = "KEY=VALUE")]
    pub inputs: Vec<String>,

    /// Extra environment for spawned commands as key=value
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Local atomics directory overlaid on the catalog
    #[arg(short = 'l', long = "local-atomics-path", env = "ATOMIC_LOCAL_PATH")]
    pub local_atomics_path: Option<PathBuf>,

    /// Copy the technique's directory into DIR instead of listing its tests
    #[arg(short = 'd', long = "dump-technique", value_name = "DIR")]
    pub dump_technique: Option<PathBuf>,

    /// Results file; `-` writes to stdout
    #[arg(short = 'o', long = "results-file", value_name = "PATH")]
    pub results_file: Option<String>,

    /// Results format: json or yaml
    #[arg(short = 'f', long = "results-format", value_parser = parse_format)]
    pub results_format: Option<ResultFormat>,

    /// Do not echo command output while running
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Emulation plan file to run instead of a single test
    #[arg(short = 'E', long = "emulation-path", value_name = "FILE", conflicts_with = "technique")]
    pub emulation_path: Option<PathBuf>,

    /// Run get-prerequisite commands for missing dependencies
    #[arg(long = "get-prereqs")]
    pub get_prereqs: bool,

    /// Run the test's cleanup command after execution
    #[arg(long)]
    pub cleanup: bool,

    /// Per-command timeout in seconds (0 = unbounded)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

fn parse_format(s: &str) -> Result<ResultFormat, String> {
    s.parse().map_err(|e: crate::engine::ResultError| e.to_string())
}

impl RunArgs {
    pub fn selector(&self) -> TestSelector {
        TestSelector {
            name: self.name.clone().filter(|n| !n.is_empty()),
            index: self.index,
            guid: self.guid.clone().filter(|g| !g.is_empty()),
        }
    }

    pub fn parsed_inputs(&self) -> Result<IndexMap<String, String>, ExecutionError> {
        parse_pairs(&expand_pairs(&self.inputs))
    }

    pub fn parsed_env(&self) -> Result<IndexMap<String, String>, ExecutionError> {
        parse_pairs(&expand_pairs(&self.env))
    }

    /// Fold command-line overrides into the loaded configuration.
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(local) = &self.local_atomics_path {
            config.local_path = Some(local.clone());
        }
        if let Some(format) = self.results_format {
            config.results_format = format;
        }
        if let Some(secs) = self.timeout {
            config.command_timeout = (secs > 0).then(|| std::time::Duration::from_secs(secs));
        }
    }
}

/// Scratch directory plus a process runner working inside it.
pub(crate) struct RunContext {
    pub scratch: ScratchDir,
    pub runner: ProcessRunner,
}

impl RunContext {
    pub fn new(
        config: &RunnerConfig,
        env: IndexMap<String, String>,
        echo: bool,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let scratch = ScratchDir::create(config.scratch_root.as_deref())?;
        let runner = ProcessRunner::new(RunnerOptions {
            env,
            working_dir: Some(scratch.to_path_buf()),
            echo,
            cancel,
            ..RunnerOptions::default()
        });
        Ok(Self { scratch, runner })
    }

    pub fn finish(self) {
        let path = self.scratch.to_path_buf();
        if let Err(e) = self.scratch.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Cancel `token` on the first Ctrl-C.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received; stopping current command and cleaning up...");
            token.cancel();
        }
    });
}

/// Dispatch a parsed command line. Returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    if let Some(Command::Config { action }) = &cli.command {
        return match action {
            ConfigAction::Show => {
                config_cmd::run_show();
                EXIT_OK
            }
            ConfigAction::Defaults => {
                config_cmd::run_defaults();
                EXIT_OK
            }
            ConfigAction::Validate { file } => config_cmd::run_validate(file.as_deref()),
        };
    }

    let mut config = config::load();
    cli.run.apply(&mut config);
    if let Err(e) = telemetry::init_logging(&config.log) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let args = &cli.run;
    if let Some(plan) = &args.emulation_path {
        return emulation_cmd::run_emulation(plan, args, &config, cancel).await;
    }
    match &args.technique {
        None => catalog_cmd::run_list(&config),
        Some(tid) if args.selector().is_empty() => match &args.dump_technique {
            Some(dir) => catalog_cmd::run_dump(&config, tid, dir),
            None => catalog_cmd::run_show(&config, tid),
        },
        Some(tid) => atomic_cmd::run_atomic(tid, args, &config, cancel).await,
    }
}
