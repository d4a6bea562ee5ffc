// Copyright 2024-2026 atomic-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::config::{self, EffectiveConfig, RunnerConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load();
    for warning in &cfg.warnings {
        eprintln!("WARNING: {}", warning);
    }
    print_config(&cfg.effective_config());
}

/// Print built-in defaults (no file or env overrides).
pub fn run_defaults() {
    print_config(&RunnerConfig::default().effective_config());
}

/// Validate configuration for misconfigurations.
///
/// With `file`, that TOML file is parsed strictly. Returns 0 if valid, 1 if
/// any problem is found.
pub fn run_validate(file: Option<&Path>) -> i32 {
    let cfg = match file {
        Some(path) => match config::load_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return 1;
            }
        },
        None => config::load(),
    };

    let problems = validate(&cfg);
    for problem in &problems {
        eprintln!("WARNING: {}", problem);
    }
    if problems.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn validate(cfg: &RunnerConfig) -> Vec<String> {
    let mut problems = cfg.warnings.clone();
    if let Err(e) = EnvFilter::try_new(&cfg.log.level) {
        problems.push(format!("log level {:?} is not a valid filter: {}", cfg.log.level, e));
    }
    if let Some(local) = &cfg.local_path {
        if !local.is_dir() {
            problems.push(format!("local atomics path {} is not a directory", local.display()));
        }
    }
    if let Some(root) = &cfg.scratch_root {
        if root.exists() && !root.is_dir() {
            problems.push(format!("scratch root {} is not a directory", root.display()));
        }
    }
    let any_catalog = cfg.bundled_path.is_dir() || cfg.custom_path.is_dir() || cfg.local_path.is_some();
    if !any_catalog {
        problems.push(format!(
            "no technique catalog found (bundled path {} does not exist)",
            cfg.bundled_path.display()
        ));
    }
    problems
}

fn print_config(cfg: &EffectiveConfig) {
    for (key, value) in cfg.pairs() {
        println!("{}={}", key, value);
    }
}
