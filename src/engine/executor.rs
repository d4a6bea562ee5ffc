//! Executor dispatch.
//!
//! The executor set is closed: `sh`, `bash`, `command_prompt`, `powershell`
//! and `manual`. Each kind knows its interpreter command line; `manual` never
//! spawns anything.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::ExecutionError;
use super::supervisor::{Supervisor, DEFAULT_DRAIN_GRACE};
use crate::process;

/// Environment variable exporting the run scratch directory to commands.
pub const SCRATCH_DIR_ENV: &str = "ATOMIC_SCRATCH_DIR";

/// Command interpreter used for a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Sh,
    Bash,
    CommandPrompt,
    #[serde(rename = "powershell")]
    PowerShell,
    Manual,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Bash => "bash",
            Self::CommandPrompt => "command_prompt",
            Self::PowerShell => "powershell",
            Self::Manual => "manual",
        }
    }

    /// Whether running this kind spawns a process.
    pub fn spawns(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// Build the interpreter invocation for `script`. `None` for `manual`.
    pub fn command(&self, script: &str) -> Option<std::process::Command> {
        match self {
            Self::Sh | Self::Bash => {
                let mut cmd = std::process::Command::new(self.as_str());
                cmd.arg("-c").arg(script);
                Some(cmd)
            }
            Self::CommandPrompt => Some(cmd_exe(script)),
            Self::PowerShell => {
                let program = if cfg!(windows) { "powershell.exe" } else { "pwsh" };
                let mut cmd = std::process::Command::new(program);
                cmd.args(["-NoProfile", "-NonInteractive", "-Command"]).arg(script);
                Some(cmd)
            }
            Self::Manual => None,
        }
    }
}

#[cfg(windows)]
fn cmd_exe(script: &str) -> std::process::Command {
    use std::os::windows::process::CommandExt;
    let mut cmd = std::process::Command::new("cmd.exe");
    // cmd.exe does its own parsing; quoting the script would corrupt it.
    cmd.arg("/c").raw_arg(script);
    cmd
}

#[cfg(not(windows))]
fn cmd_exe(script: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd.exe");
    cmd.arg("/c").arg(script);
    cmd
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorKind {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sh" => Ok(Self::Sh),
            "bash" => Ok(Self::Bash),
            "command_prompt" => Ok(Self::CommandPrompt),
            "powershell" => Ok(Self::PowerShell),
            "manual" => Ok(Self::Manual),
            _ => Err(ExecutionError::UnknownExecutor(s.to_string())),
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Exited { code: i32 },
    /// Killed by a signal without an exit code.
    Terminated,
    /// Nothing was spawned.
    Manual,
}

impl ProcessStatus {
    pub fn from_exit(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Exited { code },
            None => Self::Terminated,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 } | Self::Manual)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn manual() -> Self {
        Self {
            status: ProcessStatus::Manual,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// One command to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub executor: ExecutorKind,
    pub command: String,
    /// `None` waits without a ceiling.
    pub timeout: Option<Duration>,
    /// Whether an operator interrupt may cut this command short. Cleanup
    /// commands are not interruptible.
    pub interruptible: bool,
}

impl Invocation {
    pub fn new(executor: ExecutorKind, command: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            executor,
            command: command.into(),
            timeout,
            interruptible: true,
        }
    }

    pub fn uninterruptible(mut self) -> Self {
        self.interruptible = false;
        self
    }
}

/// Runs resolved commands on behalf of the engine.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion or deadline.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecutionError>;

    /// Whether commands run with elevated privileges.
    fn is_elevated(&self) -> bool {
        process::is_elevated()
    }
}

/// Options shared by every process a [`ProcessRunner`] spawns.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Extra environment for every command.
    pub env: IndexMap<String, String>,
    /// Working directory; also exported as `ATOMIC_SCRATCH_DIR`.
    pub working_dir: Option<PathBuf>,
    /// Mirror output to the terminal while capturing.
    pub echo: bool,
    /// Operator interrupt.
    pub cancel: CancellationToken,
    pub drain_grace: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            env: IndexMap::new(),
            working_dir: None,
            echo: false,
            cancel: CancellationToken::new(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// Spawns real host processes under a [`Supervisor`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    options: RunnerOptions,
}

impl ProcessRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    fn build(&self, invocation: &Invocation) -> Option<std::process::Command> {
        let mut cmd = invocation.executor.command(&invocation.command)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(&self.options.env);
        if let Some(dir) = &self.options.working_dir {
            cmd.current_dir(dir).env(SCRATCH_DIR_ENV, dir);
        }
        Some(cmd)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecutionError> {
        let cancel = if invocation.interruptible {
            self.options.cancel.clone()
        } else {
            CancellationToken::new()
        };
        if cancel.is_cancelled() {
            return Err(ExecutionError::Interrupted {
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let Some(mut cmd) = self.build(invocation) else {
            tracing::info!(executor = %invocation.executor, "manual executor; nothing spawned");
            return Ok(ProcessOutput::manual());
        };

        let mut tree = process::create_process_tree();
        tree.prepare(&mut cmd);
        let child = tokio::process::Command::from(cmd)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Spawn {
                executor: invocation.executor.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = tree.attach(&child) {
            tracing::warn!(error = %e, "process tree tracking unavailable; only the direct child will be killed");
        } else if !tree.covers_descendants() {
            tracing::warn!("platform cannot track descendants; only the direct child will be killed");
        }
        tracing::debug!(executor = %invocation.executor, pid = ?child.id(), "spawned");

        Supervisor::new(invocation.timeout, cancel)
            .with_echo(self.options.echo)
            .with_drain_grace(self.options.drain_grace)
            .wait(child, tree)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_names_parse_case_insensitively() {
        assert_eq!("sh".parse::<ExecutorKind>().unwrap(), ExecutorKind::Sh);
        assert_eq!("Bash".parse::<ExecutorKind>().unwrap(), ExecutorKind::Bash);
        assert_eq!(
            "command_prompt".parse::<ExecutorKind>().unwrap(),
            ExecutorKind::CommandPrompt
        );
        assert_eq!("PowerShell".parse::<ExecutorKind>().unwrap(), ExecutorKind::PowerShell);
        assert_eq!("manual".parse::<ExecutorKind>().unwrap(), ExecutorKind::Manual);
    }

    #[test]
    fn unknown_executor_is_an_error() {
        let err = "zsh".parse::<ExecutorKind>().unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownExecutor(name) if name == "zsh"));
    }

    #[test]
    fn manual_has_no_command_line() {
        assert!(ExecutorKind::Manual.command("echo hi").is_none());
        assert!(!ExecutorKind::Manual.spawns());
    }

    #[test]
    fn shell_command_lines() {
        let cmd = ExecutorKind::Bash.command("echo hi").unwrap();
        assert_eq!(cmd.get_program(), "bash");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["-c", "echo hi"]);

        let cmd = ExecutorKind::PowerShell.command("Get-Date").unwrap();
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args.last().unwrap(), &"Get-Date");
        assert!(args.contains(&std::ffi::OsStr::new("-NonInteractive")));
    }

    #[test]
    fn status_success() {
        assert!(ProcessStatus::Exited { code: 0 }.success());
        assert!(ProcessStatus::Manual.success());
        assert!(!ProcessStatus::Exited { code: 1 }.success());
        assert!(!ProcessStatus::Terminated.success());
        assert_eq!(ProcessStatus::Exited { code: 7 }.code(), Some(7));
    }

    #[tokio::test]
    async fn manual_invocation_spawns_nothing() {
        let runner = ProcessRunner::default();
        let out = runner
            .run(&Invocation::new(ExecutorKind::Manual, "anything", None))
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Manual);
    }

    #[tokio::test]
    async fn cancelled_runner_refuses_interruptible_work() {
        let options = RunnerOptions::default();
        options.cancel.cancel();
        let runner = ProcessRunner::new(options);
        let err = runner
            .run(&Invocation::new(ExecutorKind::Sh, "true", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Interrupted { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sh_runs_in_working_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = IndexMap::new();
        env.insert("ATOMIC_TEST_MARKER".to_string(), "present".to_string());
        let runner = ProcessRunner::new(RunnerOptions {
            env,
            working_dir: Some(dir.path().to_path_buf()),
            ..RunnerOptions::default()
        });
        let out = runner
            .run(&Invocation::new(
                ExecutorKind::Sh,
                "echo $ATOMIC_TEST_MARKER; pwd; echo $ATOMIC_SCRATCH_DIR",
                Some(Duration::from_secs(10)),
            ))
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Exited { code: 0 });
        let lines: Vec<_> = out.stdout.lines().collect();
        assert_eq!(lines[0], "present");
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(lines[1]).canonicalize().unwrap(), expected);
        assert_eq!(PathBuf::from(lines[2]).canonicalize().unwrap(), expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_style_invocation_ignores_interrupt() {
        let options = RunnerOptions::default();
        options.cancel.cancel();
        let runner = ProcessRunner::new(options);
        let out = runner
            .run(&Invocation::new(ExecutorKind::Sh, "exit 4", None).uninterruptible())
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Exited { code: 4 });
    }
}
