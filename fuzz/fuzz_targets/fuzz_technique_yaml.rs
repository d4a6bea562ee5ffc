//! Fuzz target for technique definition parsing.
//!
//! Arbitrary bytes must parse or fail cleanly, never panic.

#![no_main]

use std::path::Path;

use atomic_runner::catalog::{LoadedTechnique, Provenance};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(technique) = LoadedTechnique::parse(data, Provenance::Bundled, Path::new("/atomics")) {
        for test in &technique.definition.atomic_tests {
            let _ = test.dependency_executor().parse::<atomic_runner::engine::ExecutorKind>();
        }
    }
});
