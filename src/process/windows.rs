//! Windows process-tree tracking using Job Objects.
//!
//! The child is assigned to an anonymous job right after spawn; processes it
//! creates afterwards join the same job and die with `TerminateJobObject`.
//! The job is not kill-on-close, so background processes a test starts on
//! purpose survive a normal exit.

use std::ffi::c_void;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, TerminateJobObject,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use super::ProcessTree;

/// Job Object based tree tracker.
pub struct JobObjectTree {
    job: HANDLE,
    terminated: bool,
}

// SAFETY: the job handle is owned exclusively by this value and Win32 handles
// may be used from any thread.
unsafe impl Send for JobObjectTree {}

impl JobObjectTree {
    pub fn new() -> Self {
        Self {
            job: 0,
            terminated: false,
        }
    }
}

impl Default for JobObjectTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTree for JobObjectTree {
    fn prepare(&self, _command: &mut std::process::Command) {}

    fn attach(&mut self, child: &tokio::process::Child) -> std::io::Result<()> {
        let process = child.raw_handle().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "child exited before attach")
        })? as HANDLE;

        // SAFETY: null attributes and name create an anonymous job.
        let job = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
        if job == 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: both handles are valid for the duration of the call.
        if unsafe { AssignProcessToJobObject(job, process) } == 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: job was created above and is not used afterwards.
            unsafe { CloseHandle(job) };
            return Err(err);
        }
        self.job = job;
        Ok(())
    }

    fn terminate(&mut self) {
        if self.terminated || self.job == 0 {
            return;
        }
        // SAFETY: job is a live handle owned by self.
        if unsafe { TerminateJobObject(self.job, 1) } == 0 {
            let err = std::io::Error::last_os_error();
            tracing::debug!(error = %err, "TerminateJobObject failed");
        }
        self.terminated = true;
    }

    fn covers_descendants(&self) -> bool {
        true
    }
}

impl Drop for JobObjectTree {
    fn drop(&mut self) {
        if self.job != 0 {
            // SAFETY: job is owned by self and closed exactly once.
            unsafe { CloseHandle(self.job) };
        }
    }
}

pub(super) fn token_is_elevated() -> bool {
    let mut token: HANDLE = 0;
    // SAFETY: GetCurrentProcess returns a pseudo handle; token is an out param.
    if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) } == 0 {
        return false;
    }
    let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
    let mut returned = 0u32;
    // SAFETY: the buffer is a properly sized TOKEN_ELEVATION.
    let ok = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut TOKEN_ELEVATION as *mut c_void,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    // SAFETY: token was opened above.
    unsafe { CloseHandle(token) };
    ok != 0 && elevation.TokenIsElevated != 0
}
