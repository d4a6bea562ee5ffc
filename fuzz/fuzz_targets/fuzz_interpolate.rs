//! Fuzz target for argument resolution and interpolation.
//!
//! Defaults are attacker-shaped strings that may reference each other;
//! resolution must terminate with a value or an error.

#![no_main]

use std::path::Path;

use arbitrary::Arbitrary;
use indexmap::IndexMap;
use libfuzzer_sys::fuzz_target;

use atomic_runner::catalog::{AtomicTestSpec, ExecutorSpec, InputArgumentSpec};
use atomic_runner::engine::resolve_arguments;

#[derive(Debug, Arbitrary)]
struct Input {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
    command: String,
}

fuzz_target!(|input: Input| {
    let input_arguments: IndexMap<String, InputArgumentSpec> = input
        .defaults
        .into_iter()
        .take(16)
        .map(|(name, default)| {
            (
                name,
                InputArgumentSpec {
                    default: Some(default),
                    ..InputArgumentSpec::default()
                },
            )
        })
        .collect();
    let test = AtomicTestSpec {
        name: "fuzz".to_string(),
        guid: None,
        description: String::new(),
        supported_platforms: Vec::new(),
        input_arguments,
        dependency_executor_name: None,
        dependencies: Vec::new(),
        executor: ExecutorSpec {
            name: "sh".to_string(),
            command: input.command,
            ..ExecutorSpec::default()
        },
        signatures: Vec::new(),
    };
    let overrides: IndexMap<String, String> = input.overrides.into_iter().take(16).collect();

    if let Ok(args) = resolve_arguments(&test, &overrides, Path::new("/atomics")) {
        let _ = args.interpolate(&test.executor.command);
    }
});
