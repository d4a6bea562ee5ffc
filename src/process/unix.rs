//! Unix process-tree tracking using process groups.
//!
//! The child is placed in a new process group whose ID equals its PID, so
//! `killpg` reaches every descendant that has not moved to its own group.

use std::os::unix::process::CommandExt;

use super::ProcessTree;

/// Process-group based tree tracker.
pub struct ProcessGroupTree {
    pgid: Option<libc::pid_t>,
    terminated: bool,
}

impl ProcessGroupTree {
    pub fn new() -> Self {
        Self {
            pgid: None,
            terminated: false,
        }
    }
}

impl Default for ProcessGroupTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTree for ProcessGroupTree {
    fn prepare(&self, command: &mut std::process::Command) {
        command.process_group(0);
    }

    fn attach(&mut self, child: &tokio::process::Child) -> std::io::Result<()> {
        let pid = child.id().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "child exited before attach")
        })?;
        self.pgid = Some(pid as libc::pid_t);
        Ok(())
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(pgid) = self.pgid {
            // SAFETY: killpg has no memory-safety preconditions; the group was
            // created for this child and a stale ID only yields ESRCH.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                tracing::debug!(pgid, error = %err, "killpg failed");
            }
        }
        self.terminated = true;
    }

    fn covers_descendants(&self) -> bool {
        true
    }
}

pub(super) fn effective_uid_is_root() -> bool {
    // SAFETY: geteuid cannot fail and touches no memory.
    unsafe { libc::geteuid() == 0 }
}
