//! End-to-end runs through real shells. Unix only.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use atomic_runner::catalog::FileCatalog;
use atomic_runner::engine::{
    CleanupPolicy, CleanupState, Engine, EngineOptions, ExecutionStatus, ProcessRunner,
    RunnerOptions, TestSelector,
};
use atomic_runner::scratch::ScratchDir;
use common::{inputs, linux_options, write_technique};

const T1070: &str = r##"
attack_technique: T1070.004
display_name: "Indicator Removal: File Deletion"
atomic_tests:
- name: Write then delete
  supported_platforms: [linux, macos]
  input_arguments:
    file_name:
      type: string
      default: marker.txt
  dependencies:
  - description: sh is on PATH
    prereq_command: "command -v sh"
  executor:
    name: sh
    command: |
      echo created > "$ATOMIC_SCRATCH_DIR/#{file_name}"
      cat "#{file_name}"
      echo warn 1>&2
    cleanup_command: "rm -f #{file_name}"
- name: Slow tree
  supported_platforms: [linux, macos]
  executor:
    name: sh
    command: "echo begin; sleep 30 & sleep 30"
"##;

struct Fixture {
    _atomics: tempfile::TempDir,
    scratch: ScratchDir,
    engine: Engine<FileCatalog, ProcessRunner>,
}

fn fixture(options: EngineOptions, cancel: CancellationToken) -> Fixture {
    let atomics = tempfile::tempdir().unwrap();
    write_technique(atomics.path(), "T1070.004", T1070);
    let scratch = ScratchDir::create(None).unwrap();
    let runner = ProcessRunner::new(RunnerOptions {
        working_dir: Some(scratch.to_path_buf()),
        cancel,
        drain_grace: Duration::from_millis(200),
        ..RunnerOptions::default()
    });
    let catalog = FileCatalog::new(atomics.path().to_path_buf(), None, None);
    Fixture {
        _atomics: atomics,
        scratch,
        engine: Engine::new(catalog, runner, options),
    }
}

fn host_options() -> EngineOptions {
    EngineOptions {
        platform: atomic_runner::process::host_platform().to_string(),
        ..linux_options()
    }
}

#[tokio::test]
async fn test_runs_in_scratch_dir_and_cleans_up() {
    let options = EngineOptions {
        cleanup: CleanupPolicy::AfterExecution,
        ..host_options()
    };
    let fx = fixture(options, CancellationToken::new());
    let result = fx
        .engine
        .execute("T1070.004", &TestSelector::by_index(0), &inputs(&[]))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Exited { code: 0 });
    assert_eq!(result.stdout.trim(), "created");
    assert_eq!(result.stderr.trim(), "warn");
    assert_eq!(result.cleanup.as_ref().unwrap().state, CleanupState::Succeeded);
    assert!(!fx.scratch.path().join("marker.txt").exists());
}

#[tokio::test]
async fn test_timeout_kills_whole_tree() {
    let options = EngineOptions {
        timeout: Some(Duration::from_secs(1)),
        ..host_options()
    };
    let fx = fixture(options, CancellationToken::new());
    let started = Instant::now();
    let result = fx
        .engine
        .execute("T1070.004", &TestSelector::by_name("Slow tree"), &inputs(&[]))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::TimedOut { timeout_ms: 1_000 });
    assert_eq!(result.stdout.trim(), "begin");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_operator_interrupt_stops_running_command() {
    let cancel = CancellationToken::new();
    let fx = fixture(host_options(), cancel.clone());
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = fx
        .engine
        .execute("T1070.004", &TestSelector::by_name("Slow tree"), &inputs(&[]))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Interrupted);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_scratch_dir_removed_after_run() {
    let fx = fixture(host_options(), CancellationToken::new());
    let path = fx.scratch.to_path_buf();
    let result = tokio_test::block_on(fx.engine.execute(
        "T1070.004",
        &TestSelector::by_index(0),
        &inputs(&[]),
    ))
    .unwrap();
    assert!(path.join("marker.txt").exists());
    assert!(result.status.exit_code() == Some(0));

    fx.scratch.close().unwrap();
    assert!(!path.exists());
}
