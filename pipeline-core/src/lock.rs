//! Process liveness and exclusion primitives.
//!
//! Liveness and termination are checked by shelling out to `kill` rather than
//! linking a signals crate — this keeps the dependency surface the same as
//! everywhere else host processes are inspected or controlled.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Result};

/// RAII guard over a single-repo lock file, preventing two supervisor
/// instances from running against the same status directory at once.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock at `<base_dir>/locks/<name>.lock`.
    ///
    /// A live lock (PID still running) is rejected unless `force` is set, in
    /// which case the old process is sent SIGTERM before the lock is taken
    /// over. A stale lock (PID no longer running) is always overwritten.
    pub fn acquire(base_dir: &Path, name: &str, force: bool) -> Result<Self> {
        let locks_dir = base_dir.join("locks");
        std::fs::create_dir_all(&locks_dir)?;
        let path = locks_dir.join(format!("{name}.lock"));

        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Some(pid) = contents.trim().parse::<u32>().ok() {
                if is_pid_alive(pid) {
                    if force {
                        eprintln!("pipeline: killing existing instance (PID {pid}) for {name}");
                        terminate(pid);
                        std::thread::sleep(std::time::Duration::from_millis(500));
                    } else {
                        bail!(
                            "another process (PID {pid}) already holds the lock for {name}; \
                             pass --force to override"
                        );
                    }
                }
            }
        }

        std::fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Returns true if `pid` is currently running (`kill -0`).
pub fn is_pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Send SIGTERM, allowing the process to shut down cleanly.
pub fn terminate(pid: u32) {
    let _ = Command::new("kill").args([&pid.to_string()]).status();
}

/// Send SIGKILL, unconditionally.
pub fn kill(pid: u32) {
    let _ = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status();
}
