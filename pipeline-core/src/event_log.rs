//! Structured JSON-Lines event log for the supervisor and worker processes.
//!
//! Writes one JSON object per line to `<logs_dir>/pipeline.log`, so progress
//! is observable with `tail -f` without duplicating the interactive console
//! output the supervisor and worker already print.
//!
//! ## Event types
//!
//! | `event`            | When                                              |
//! |---------------------|----------------------------------------------------|
//! | `cycle_start`        | Supervisor poll tick begins                        |
//! | `cycle_end`          | Supervisor poll tick ends                          |
//! | `worker_spawned`     | A worker process has been started for an issue     |
//! | `worker_result`      | A worker process has reached a terminal phase      |
//! | `issue_skipped`      | Issue excluded from dispatch (existing worker/CR)  |
//! | `back_pressure`      | Dispatch paused: no free pool slots                |
//! | `error`              | Non-fatal error during a poll tick                 |

use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

/// Handle to the structured event log. Writes are best-effort: a broken log
/// path must never disrupt the supervisor or worker loop.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn open(logs_dir: &Path) -> Self {
        Self {
            path: logs_dir.join("pipeline.log"),
        }
    }

    pub fn emit(&self, mut event: Value) {
        if let Some(obj) = event.as_object_mut() {
            obj.insert(
                "ts".to_string(),
                Value::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            );
        }
        let mut line = event.to_string();
        line.push('\n');
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = f.write_all(line.as_bytes());
        }
    }

    pub fn cycle_start(&self) {
        self.emit(json!({"event": "cycle_start"}));
    }

    pub fn cycle_end(&self) {
        self.emit(json!({"event": "cycle_end"}));
    }

    pub fn worker_spawned(&self, issue_number: u64, pid: u32) {
        self.emit(json!({"event": "worker_spawned", "issue_number": issue_number, "pid": pid}));
    }

    pub fn worker_result(&self, issue_number: u64, phase: &str, duration_s: u64) {
        self.emit(json!({
            "event": "worker_result",
            "issue_number": issue_number,
            "phase": phase,
            "duration_s": duration_s,
        }));
    }

    pub fn issue_skipped(&self, issue_number: u64, reason: &str) {
        self.emit(json!({"event": "issue_skipped", "issue_number": issue_number, "reason": reason}));
    }

    pub fn back_pressure(&self, active: usize, capacity: usize) {
        self.emit(json!({"event": "back_pressure", "active": active, "capacity": capacity}));
    }

    pub fn error(&self, message: &str) {
        self.emit(json!({"event": "error", "message": message}));
    }
}
