//! Host process primitives.
//!
//! Platform-specific process-tree tracking so a timed-out command can be torn
//! down together with everything it spawned, plus privilege detection.

#[cfg(windows)]
mod windows;
#[cfg(unix)]
mod unix;

#[cfg(windows)]
pub use windows::JobObjectTree;
#[cfg(unix)]
pub use unix::ProcessGroupTree;

/// Tracks a spawned child and its descendants.
pub trait ProcessTree: Send {
    /// Configure the command before spawn.
    fn prepare(&self, command: &mut std::process::Command);

    /// Start tracking a freshly spawned child.
    fn attach(&mut self, child: &tokio::process::Child) -> std::io::Result<()>;

    /// Forcefully terminate the child and its descendants. Idempotent.
    fn terminate(&mut self);

    /// Whether descendants are covered, not just the direct child.
    fn covers_descendants(&self) -> bool;
}

/// Create the process-tree tracker for the current platform.
pub fn create_process_tree() -> Box<dyn ProcessTree> {
    #[cfg(windows)]
    {
        Box::new(JobObjectTree::new())
    }
    #[cfg(unix)]
    {
        Box::new(ProcessGroupTree::new())
    }
    #[cfg(not(any(windows, unix)))]
    {
        Box::new(DirectChildOnly)
    }
}

/// Whether the current process runs with elevated privileges
/// (root on Unix, an elevated token on Windows).
pub fn is_elevated() -> bool {
    #[cfg(windows)]
    {
        windows::token_is_elevated()
    }
    #[cfg(unix)]
    {
        unix::effective_uid_is_root()
    }
    #[cfg(not(any(windows, unix)))]
    {
        false
    }
}

/// Platform name as used in `supported_platforms`.
pub fn host_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        std::env::consts::OS
    }
}

/// Fallback for platforms without process groups or job objects.
#[cfg(not(any(windows, unix)))]
struct DirectChildOnly;

#[cfg(not(any(windows, unix)))]
impl ProcessTree for DirectChildOnly {
    fn prepare(&self, _command: &mut std::process::Command) {}

    fn attach(&mut self, _child: &tokio::process::Child) -> std::io::Result<()> {
        Ok(())
    }

    fn terminate(&mut self) {}

    fn covers_descendants(&self) -> bool {
        false
    }
}
