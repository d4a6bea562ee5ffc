//! Deadline-bound supervision of one spawned process.
//!
//! Process completion races a deadline timer and an operator cancellation
//! token. Whichever arm wins, the other futures are dropped; on deadline or
//! cancellation the whole process tree is killed and reaped. Output read
//! before termination is kept.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::ExecutionError;
use super::executor::{ProcessOutput, ProcessStatus};
use crate::process::ProcessTree;

/// Per-stream capture ceiling; excess output is dropped.
pub const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

/// How long readers may keep draining after the process is gone.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Where captured output is mirrored while it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    Stdout,
    Stderr,
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Races a child against its deadline.
#[derive(Debug, Clone)]
pub struct Supervisor {
    timeout: Option<Duration>,
    drain_grace: Duration,
    echo: bool,
    cancel: CancellationToken,
}

enum Winner {
    Exited(std::io::Result<std::process::ExitStatus>),
    Deadline,
    Cancelled,
}

impl Supervisor {
    /// `timeout = None` waits without a ceiling.
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            timeout,
            drain_grace: DEFAULT_DRAIN_GRACE,
            echo: false,
            cancel,
        }
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Mirror output to this process's stdout/stderr while capturing.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Wait for `child`, enforcing the deadline on its whole tree.
    pub async fn wait(
        &self,
        mut child: Child,
        mut tree: Box<dyn ProcessTree>,
    ) -> Result<ProcessOutput, ExecutionError> {
        let started = Instant::now();
        let stdout_buf: SharedBuffer = Arc::default();
        let stderr_buf: SharedBuffer = Arc::default();
        let readers = [
            spawn_reader(child.stdout.take(), stdout_buf.clone(), self.echo.then_some(Echo::Stdout)),
            spawn_reader(child.stderr.take(), stderr_buf.clone(), self.echo.then_some(Echo::Stderr)),
        ];

        let winner = tokio::select! {
            status = child.wait() => Winner::Exited(status),
            () = deadline(self.timeout) => Winner::Deadline,
            () = self.cancel.cancelled() => Winner::Cancelled,
        };

        if !matches!(winner, Winner::Exited(_)) {
            tree.terminate();
            // Direct child, in case it left the group or the job assignment failed.
            let _ = child.start_kill();
            if let Err(e) = child.wait().await {
                tracing::warn!(error = %e, "failed to reap terminated process");
            }
        }

        drain(readers, self.drain_grace).await;
        let stdout = take_string(&stdout_buf);
        let stderr = take_string(&stderr_buf);
        let elapsed = started.elapsed();

        match winner {
            Winner::Exited(Ok(status)) => Ok(ProcessOutput {
                status: ProcessStatus::from_exit(status),
                stdout,
                stderr,
                elapsed,
            }),
            Winner::Exited(Err(e)) => Err(ExecutionError::Spawn {
                executor: "wait".into(),
                reason: e.to_string(),
            }),
            Winner::Deadline => {
                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "command exceeded deadline; process tree terminated");
                Err(ExecutionError::ExecutionTimeout { timeout, stdout, stderr })
            }
            Winner::Cancelled => {
                tracing::warn!("command interrupted; process tree terminated");
                Err(ExecutionError::Interrupted { stdout, stderr })
            }
        }
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending::<()>().await,
    }
}

fn spawn_reader<R>(pipe: Option<R>, buf: SharedBuffer, echo: Option<Echo>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = vec![0u8; 8192];
        loop {
            let n = match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            {
                let mut guard = buf.lock();
                let room = MAX_CAPTURE_BYTES.saturating_sub(guard.len());
                guard.extend_from_slice(&chunk[..n.min(room)]);
            }
            match echo {
                Some(Echo::Stdout) => {
                    let _ = tokio::io::stdout().write_all(&chunk[..n]).await;
                }
                Some(Echo::Stderr) => {
                    let _ = tokio::io::stderr().write_all(&chunk[..n]).await;
                }
                None => {}
            }
        }
    })
}

/// Let readers hit EOF, then abort any still held open by orphaned
/// descendants.
async fn drain(readers: [JoinHandle<()>; 2], grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

fn take_string(buf: &SharedBuffer) -> String {
    let bytes = std::mem::take(&mut *buf.lock());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::create_process_tree;
    use std::process::Stdio;

    fn spawn_sh(script: &str) -> (Child, Box<dyn ProcessTree>) {
        let mut tree = create_process_tree();
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        tree.prepare(&mut cmd);
        let child = tokio::process::Command::from(cmd).spawn().unwrap();
        tree.attach(&child).unwrap();
        (child, tree)
    }

    #[tokio::test]
    async fn completion_before_deadline_returns_output() {
        let (child, tree) = spawn_sh("echo out; echo err >&2; exit 3");
        let sup = Supervisor::new(Some(Duration::from_secs(10)), CancellationToken::new());
        let out = sup.wait(child, tree).await.unwrap();
        assert_eq!(out.status, ProcessStatus::Exited { code: 3 });
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn deadline_kills_and_keeps_partial_output() {
        let (child, tree) = spawn_sh("echo started; sleep 30; echo never");
        let sup = Supervisor::new(Some(Duration::from_millis(300)), CancellationToken::new());
        let begin = Instant::now();
        let err = sup.wait(child, tree).await.unwrap_err();
        assert!(begin.elapsed() < Duration::from_secs(10));
        match err {
            ExecutionError::ExecutionTimeout { stdout, timeout, .. } => {
                assert_eq!(stdout.trim(), "started");
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_kills_grandchildren() {
        // The background sleep keeps stdout open unless the group is killed.
        let (child, tree) = spawn_sh("sleep 30 & sleep 30");
        let sup = Supervisor::new(Some(Duration::from_millis(200)), CancellationToken::new())
            .with_drain_grace(Duration::from_secs(5));
        let begin = Instant::now();
        let err = sup.wait(child, tree).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ExecutionTimeout { .. }));
        assert!(begin.elapsed() < Duration::from_secs(4), "readers hung on orphaned pipe");
    }

    #[tokio::test]
    async fn cancellation_interrupts() {
        let (child, tree) = spawn_sh("sleep 30");
        let cancel = CancellationToken::new();
        let sup = Supervisor::new(None, cancel.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let err = sup.wait(child, tree).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Interrupted { .. }));
        trigger.await.unwrap();
    }
}
