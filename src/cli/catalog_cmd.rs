// Copyright 2024-2026 atomic-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Catalog browsing: list techniques, show the tests of one technique.

use std::path::Path;

use crate::catalog::{CatalogError, FileCatalog, LoadedTechnique, TechniqueSource};
use crate::config::RunnerConfig;

use super::{EXIT_FAILURE, EXIT_OK};

/// Print every technique available across catalog tiers.
pub fn run_list(config: &RunnerConfig) -> i32 {
    let catalog = config.catalog();
    match list_techniques(&catalog) {
        Ok(rows) if rows.is_empty() => {
            println!("No techniques found.");
            if !catalog.has_bundled() {
                println!("No bundled catalog at {}; set ATOMIC_BUNDLED_PATH or --local-atomics-path.", config.bundled_path.display());
            }
            EXIT_OK
        }
        Ok(rows) => {
            println!("Locally Available Techniques:\n");
            for (id, name) in rows {
                println!("{} - {}", id, name);
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error listing techniques: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Print the numbered tests of one technique.
pub fn run_show(config: &RunnerConfig, technique_id: &str) -> i32 {
    match config.catalog().load(technique_id) {
        Ok(technique) => {
            print!("{}", format_technique(&technique));
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error getting details for {}: {}", technique_id, e);
            EXIT_FAILURE
        }
    }
}

/// Copy the technique's files into `dir`.
pub fn run_dump(config: &RunnerConfig, technique_id: &str, dir: &Path) -> i32 {
    match config.catalog().dump(technique_id, dir) {
        Ok(dest) => {
            println!("Technique {} files dumped to {}", technique_id, dest.display());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error dumping technique: {}", e);
            EXIT_FAILURE
        }
    }
}

/// `(id, display name)` pairs; unreadable definitions keep their ID.
fn list_techniques(catalog: &FileCatalog) -> Result<Vec<(String, String)>, CatalogError> {
    let ids = catalog.list()?;
    Ok(ids
        .into_iter()
        .map(|id| {
            let name = match catalog.load(&id) {
                Ok(t) => t.definition.display_name,
                Err(e) => format!("<unreadable: {}>", e),
            };
            (id, name)
        })
        .collect())
}

pub fn format_technique(technique: &LoadedTechnique) -> String {
    let mut out = format!(
        "Technique: {} - {} ({})\nTests:\n",
        technique.id(),
        technique.definition.display_name,
        technique.provenance.as_str()
    );
    for (i, test) in technique.definition.atomic_tests.iter().enumerate() {
        let platforms = test.supported_platforms.join(", ");
        out.push_str(&format!(
            "  {:>2}. {:<50} [{}] {}\n",
            i,
            truncate(&test.name, 50),
            test.executor.name,
            platforms
        ));
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
