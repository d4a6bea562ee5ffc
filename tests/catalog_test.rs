//! Catalog tiers feeding the engine, and results written to disk.

mod common;

use std::path::MAIN_SEPARATOR;

use chrono::TimeZone;

use atomic_runner::catalog::{FileCatalog, Provenance, TechniqueSource};
use atomic_runner::engine::{
    default_results_file, Engine, ExecutionResult, ResultFormat, ResultSink, TestSelector,
};
use common::{inputs, linux_options, write_technique, ScriptedRunner};

const BUNDLED: &str = r#"
attack_technique: T1218.011
display_name: "System Binary Proxy Execution: Rundll32"
atomic_tests:
- name: Run payload
  supported_platforms: [linux]
  input_arguments:
    payload:
      type: path
      default: PathToAtomicsFolder/T1218.011/bin/payload.sh
  executor:
    name: sh
    command: "sh #{payload}"
"#;

const LOCAL: &str = r#"
attack_technique: T1218.011
display_name: Local override
atomic_tests:
- name: Run payload
  supported_platforms: [linux]
  executor:
    name: sh
    command: echo local
"#;

#[test]
fn test_atomics_folder_resolves_against_source_tier() {
    let bundled = tempfile::tempdir().unwrap();
    write_technique(bundled.path(), "T1218.011", BUNDLED);
    let catalog = FileCatalog::new(bundled.path().to_path_buf(), None, None);
    let engine = Engine::new(catalog, ScriptedRunner::new(), linux_options());

    let result = tokio_test::block_on(engine.execute("T1218.011", &TestSelector::by_index(0), &inputs(&[]))).unwrap();

    assert_eq!(result.provenance, Provenance::Bundled);
    let expected = bundled
        .path()
        .join("T1218.011")
        .join("bin")
        .join("payload.sh");
    assert_eq!(result.inputs["payload"], expected.display().to_string());
    assert_eq!(result.command, format!("sh {}", expected.display()));
    assert!(!result.inputs["payload"].contains(if MAIN_SEPARATOR == '/' { '\\' } else { '/' }));
}

#[test]
fn test_local_overlay_wins_and_is_tagged() {
    let bundled = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    write_technique(bundled.path(), "T1218.011", BUNDLED);
    write_technique(local.path(), "T1218.011", LOCAL);
    let catalog = FileCatalog::new(
        bundled.path().to_path_buf(),
        None,
        Some(local.path().to_path_buf()),
    );

    let technique = catalog.load("T1218.011").unwrap();
    assert_eq!(technique.provenance, Provenance::Local);
    assert_eq!(technique.definition.display_name, "Local override");
    assert_eq!(catalog.list().unwrap(), vec!["T1218.011"]);
}

#[test]
fn test_missing_local_path_is_an_error_for_listing() {
    let bundled = tempfile::tempdir().unwrap();
    let catalog = FileCatalog::new(
        bundled.path().to_path_buf(),
        None,
        Some(bundled.path().join("nope")),
    );
    assert!(catalog.list().is_err());
}

#[test]
fn test_results_written_in_both_formats() {
    let bundled = tempfile::tempdir().unwrap();
    write_technique(bundled.path(), "T1218.011", LOCAL);
    let catalog = FileCatalog::new(bundled.path().to_path_buf(), None, None);
    let engine = Engine::new(catalog, ScriptedRunner::new(), linux_options());
    let result = tokio_test::block_on(engine.execute("T1218.011", &TestSelector::by_index(0), &inputs(&[]))).unwrap();

    let out = tempfile::tempdir().unwrap();
    let at = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
    let yaml_path = out.path().join(default_results_file("T1218.011", at, ResultFormat::Yaml));
    let json_path = out.path().join(default_results_file("T1218.011", at, ResultFormat::Json));
    ResultSink::File(yaml_path.clone()).write(&result, ResultFormat::Yaml).unwrap();
    ResultSink::File(json_path.clone()).write(&result, ResultFormat::Json).unwrap();

    assert!(yaml_path.to_string_lossy().ends_with("2026-03-01T12.30.05Z.yaml"));
    let from_yaml: ExecutionResult = serde_yaml::from_str(&std::fs::read_to_string(&yaml_path).unwrap()).unwrap();
    let from_json: ExecutionResult = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(from_yaml.run_id, result.run_id);
    assert_eq!(from_json.status, result.status);
    assert_eq!(from_json.command, "echo local");
}
