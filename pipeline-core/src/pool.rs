//! Worker process pool: admission, liveness polling, timeout enforcement, and
//! reaping — one OS process per issue, never cooperative tasks within this
//! process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::lock::{is_pid_alive, kill, terminate};
use crate::model::WorkerPhase;
use crate::status_store::FileStatusStore;

pub struct WorkerHandle {
    pub issue_number: u64,
    pub pid: u32,
    pub spawned_at: Instant,
    pub started_at: String,
    child: Option<Child>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTransition {
    /// Still running, snapshot refreshed but no phase change worth acting on.
    StillActive,
    /// Snapshot reports a terminal phase; the worker is ready to reap.
    Terminal(WorkerPhase),
    /// Process is gone but the last snapshot never reached a terminal phase
    /// — treated as a crash, not a normal completion.
    DiedWithoutTerminalPhase,
}

/// Admits one OS process per issue, up to `capacity` concurrent workers.
pub struct WorkerPool {
    capacity: usize,
    worker_binary: PathBuf,
    status_store: FileStatusStore,
    timeout_s: u64,
    workers: HashMap<u64, WorkerHandle>,
}

impl WorkerPool {
    pub fn new(capacity: usize, worker_binary: PathBuf, status_dir: PathBuf, timeout_s: u64) -> Self {
        Self {
            capacity,
            worker_binary,
            status_store: FileStatusStore::new(status_dir),
            timeout_s,
            workers: HashMap::new(),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.workers.len())
    }

    /// Spawn a worker process for `issue_number`/`repo`, unless one is
    /// already tracked for that issue — spawning is a no-op in that case so
    /// a supervisor retry never produces a duplicate worker.
    pub fn spawn(&mut self, repo: &str, issue_number: u64) -> Result<()> {
        if self.workers.contains_key(&issue_number) {
            return Ok(());
        }
        if self.available_slots() == 0 {
            return Ok(());
        }

        let mut command = Command::new(&self.worker_binary);
        command.args(["run", "--repo", repo, "--issue", &issue_number.to_string()]);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Its own process group so it survives this supervisor exiting
            // without the child receiving a SIGHUP.
            command.process_group(0);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker for issue {issue_number}"))?;
        let pid = child.id();

        self.workers.insert(
            issue_number,
            WorkerHandle {
                issue_number,
                pid,
                spawned_at: Instant::now(),
                started_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                child: Some(child),
            },
        );
        Ok(())
    }

    /// Cross the liveness check against the last persisted snapshot for every
    /// tracked worker.
    pub fn poll(&mut self) -> Vec<(u64, WorkerTransition)> {
        let mut transitions = Vec::new();
        for handle in self.workers.values_mut() {
            if let Some(child) = handle.child.as_mut() {
                let _ = child.try_wait();
            }
            let alive = is_pid_alive(handle.pid);
            let snapshot = self.status_store.read_worker(handle.issue_number);

            let transition = match (alive, snapshot) {
                (_, Some(s)) if s.phase.is_terminal() => WorkerTransition::Terminal(s.phase),
                (true, _) => WorkerTransition::StillActive,
                (false, _) => WorkerTransition::DiedWithoutTerminalPhase,
            };
            transitions.push((handle.issue_number, transition));
        }
        transitions
    }

    pub fn timed_out_workers(&self) -> Vec<(u64, String)> {
        self.workers
            .values()
            .filter(|h| h.spawned_at.elapsed() > Duration::from_secs(self.timeout_s))
            .map(|h| (h.issue_number, h.started_at.clone()))
            .collect()
    }

    /// SIGTERM, then SIGKILL after a short grace period if the process is
    /// still alive.
    pub fn kill_worker(&mut self, issue_number: u64) {
        if let Some(handle) = self.workers.get(&issue_number) {
            terminate(handle.pid);
            std::thread::sleep(Duration::from_secs(2));
            if is_pid_alive(handle.pid) {
                kill(handle.pid);
            }
        }
    }

    pub fn reap(&mut self, issue_number: u64) {
        self.workers.remove(&issue_number);
    }

    pub fn active_issue_numbers(&self) -> Vec<u64> {
        self.workers.keys().copied().collect()
    }
}
