//! Filesystem adapter for the status protocol: single-writer-per-file worker
//! snapshots, plus the append-only notification and escalation journals.
//!
//! Every write goes through [`atomic_write`] (temp file in the same
//! directory, `sync_all`, then `rename`) so a reader never observes a
//! partially-written file — the rename is the only visible state change.

use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use crate::model::{AnimationSnapshot, Escalation, Notification, WorkerSnapshot};

/// Write `content` to `path` without ever exposing a half-written file to
/// concurrent readers.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

fn worker_snapshot_path(status_dir: &Path, issue_number: u64) -> PathBuf {
    status_dir.join(format!("worker-{issue_number}.json"))
}

fn animation_snapshot_path(status_dir: &Path, issue_number: u64) -> PathBuf {
    status_dir.join(format!("animation-worker-{issue_number}.json"))
}

/// Read/write access to `worker-<id>.json` snapshots under a status
/// directory. Each worker process is the sole writer of its own file; the
/// supervisor and CLIs only ever read.
pub struct FileStatusStore {
    status_dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(status_dir: impl Into<PathBuf>) -> Self {
        Self {
            status_dir: status_dir.into(),
        }
    }

    pub fn write_worker(&self, snapshot: &WorkerSnapshot) -> Result<()> {
        fs::create_dir_all(&self.status_dir)?;
        let path = worker_snapshot_path(&self.status_dir, snapshot.issue_number);
        let json = serde_json::to_string_pretty(snapshot)?;
        atomic_write(&path, &json)
    }

    /// A missing file or a file that fails to parse both read as `None` — a
    /// reader racing a writer's rename must never see this as an error.
    pub fn read_worker(&self, issue_number: u64) -> Option<WorkerSnapshot> {
        let path = worker_snapshot_path(&self.status_dir, issue_number);
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn write_animation(&self, snapshot: &AnimationSnapshot) -> Result<()> {
        fs::create_dir_all(&self.status_dir)?;
        let path = animation_snapshot_path(&self.status_dir, snapshot.issue_number);
        let json = serde_json::to_string_pretty(snapshot)?;
        atomic_write(&path, &json)
    }

    pub fn read_animation(&self, issue_number: u64) -> Option<AnimationSnapshot> {
        let path = animation_snapshot_path(&self.status_dir, issue_number);
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// List every `worker-*.json` snapshot in the status directory, skipping
    /// files that fail to parse rather than aborting the scan.
    pub fn list_worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        list_matching(&self.status_dir, "worker-", |s| serde_json::from_str(s).ok())
    }

    pub fn list_animation_snapshots(&self) -> Vec<AnimationSnapshot> {
        list_matching(&self.status_dir, "animation-worker-", |s| {
            serde_json::from_str(s).ok()
        })
    }
}

fn list_matching<T>(dir: &Path, prefix: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || !name.ends_with(".json") {
            continue;
        }
        if prefix == "worker-" && name.starts_with("animation-worker-") {
            continue;
        }
        if let Ok(contents) = fs::read_to_string(entry.path()) {
            if let Some(v) = parse(&contents) {
                out.push(v);
            }
        }
    }
    out
}

/// Append-only JSON-Lines journal shared by one or more writers. Appends take
/// an advisory exclusive lock on the file itself so two workers can never
/// interleave a torn line.
struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    fn append_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        f.lock_exclusive()
            .with_context(|| format!("failed to lock {}", self.path.display()))?;
        let result = (|| -> Result<()> {
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
            Ok(())
        })();
        let _ = FileExt::unlock(&f);
        result
    }

    fn read_all<T: serde::de::DeserializeOwned>(&self) -> Vec<T> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

pub struct NotificationJournal(JsonlJournal);

impl NotificationJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(JsonlJournal { path: path.into() })
    }

    pub fn append(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        self.0.append_line(&line)
    }

    pub fn read_all(&self) -> Vec<Notification> {
        self.0.read_all()
    }
}

pub struct EscalationLog(JsonlJournal);

impl EscalationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(JsonlJournal { path: path.into() })
    }

    pub fn append(&self, escalation: &Escalation) -> Result<()> {
        let line = serde_json::to_string(escalation)?;
        self.0.append_line(&line)
    }

    pub fn read_all(&self) -> Vec<Escalation> {
        self.0.read_all()
    }
}
