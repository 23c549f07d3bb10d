//! Runtime configuration — layered defaults, `<base_dir>/config` key=value
//! file, then `PIPELINE_*` environment overrides. `once` is a CLI flag, never
//! a config key, so scripted test runs never depend on environment state.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_ISSUE_POLL_INTERVAL_S: u64 = 60;
const DEFAULT_WORKER_POLL_INTERVAL_S: u64 = 30;
const DEFAULT_REVIEW_TIMEOUT_S: u64 = 600;
const DEFAULT_REVIEW_POLL_S: u64 = 15;
const DEFAULT_CI_TIMEOUT_S: u64 = 600;
const DEFAULT_CI_POLL_S: u64 = 30;
const DEFAULT_MAIN_BUILD_TIMEOUT_S: u64 = 300;
const DEFAULT_MAIN_BUILD_POLL_S: u64 = 15;
const DEFAULT_WORKER_TIMEOUT_S: u64 = 4 * 60 * 60;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_WORKERS: usize = 3;
pub const DEFAULT_AUTO_ASSIGN_LABELS: &[&str] = &["good-first-issue", "bug", "enhancement"];
pub const DEFAULT_SKIP_LABELS: &[&str] = &["wontfix", "duplicate", "invalid", "manual"];

/// Parse a flat `key = value` (or `key=value`) file, skipping blank lines and
/// `#`-prefixed comments.
fn read_kv_file(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = fs::read_to_string(path) else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

fn override_u64(map: &HashMap<String, String>, key: &str, env_key: &str, current: &mut u64) {
    if let Some(v) = map.get(key).and_then(|v| v.parse().ok()) {
        *current = v;
    }
    if let Ok(v) = std::env::var(env_key) {
        if let Ok(v) = v.parse() {
            *current = v;
        }
    }
}

fn override_u32(map: &HashMap<String, String>, key: &str, env_key: &str, current: &mut u32) {
    if let Some(v) = map.get(key).and_then(|v| v.parse().ok()) {
        *current = v;
    }
    if let Ok(v) = std::env::var(env_key) {
        if let Ok(v) = v.parse() {
            *current = v;
        }
    }
}

fn parse_label_set(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn override_label_set(map: &HashMap<String, String>, key: &str, env_key: &str, current: &mut Vec<String>) {
    if let Some(v) = map.get(key) {
        *current = parse_label_set(v);
    }
    if let Ok(v) = std::env::var(env_key) {
        *current = parse_label_set(&v);
    }
}

/// Configuration for the supervisor's issue-polling / worker-pool loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub issue_poll_interval_s: u64,
    pub worker_poll_interval_s: u64,
    pub worker_timeout_s: u64,
    pub max_workers: usize,
    pub auto_assign_labels: Vec<String>,
    pub skip_labels: Vec<String>,
    pub status_dir: std::path::PathBuf,
}

impl SupervisorConfig {
    pub fn default_for(base_dir: &Path) -> Self {
        Self {
            issue_poll_interval_s: DEFAULT_ISSUE_POLL_INTERVAL_S,
            worker_poll_interval_s: DEFAULT_WORKER_POLL_INTERVAL_S,
            worker_timeout_s: DEFAULT_WORKER_TIMEOUT_S,
            max_workers: DEFAULT_MAX_WORKERS,
            auto_assign_labels: DEFAULT_AUTO_ASSIGN_LABELS.iter().map(|s| s.to_string()).collect(),
            skip_labels: DEFAULT_SKIP_LABELS.iter().map(|s| s.to_string()).collect(),
            status_dir: base_dir.join("status"),
        }
    }

    pub fn load(base_dir: &Path) -> Self {
        let mut cfg = Self::default_for(base_dir);
        let map = read_kv_file(&base_dir.join("config"));

        override_u64(&map, "issue_poll_interval_s", "PIPELINE_ISSUE_POLL_INTERVAL_S", &mut cfg.issue_poll_interval_s);
        override_u64(&map, "worker_poll_interval_s", "PIPELINE_WORKER_POLL_INTERVAL_S", &mut cfg.worker_poll_interval_s);
        override_u64(&map, "worker_timeout_s", "PIPELINE_WORKER_TIMEOUT_S", &mut cfg.worker_timeout_s);
        override_label_set(&map, "auto_assign_labels", "PIPELINE_AUTO_ASSIGN_LABELS", &mut cfg.auto_assign_labels);
        override_label_set(&map, "skip_labels", "PIPELINE_SKIP_LABELS", &mut cfg.skip_labels);

        if let Some(v) = map.get("max_workers").and_then(|v| v.parse().ok()) {
            cfg.max_workers = v;
        }
        if let Ok(v) = std::env::var("PIPELINE_MAX_WORKERS") {
            if let Ok(v) = v.parse() {
                cfg.max_workers = v;
            }
        }

        cfg
    }
}

/// Configuration for a single worker process driving one issue to merge.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub review_timeout_s: u64,
    pub review_poll_s: u64,
    pub ci_timeout_s: u64,
    pub ci_poll_s: u64,
    pub main_build_timeout_s: u64,
    pub main_build_poll_s: u64,
    pub max_retries: u32,
    pub status_dir: std::path::PathBuf,
}

impl WorkerConfig {
    pub fn default_for(base_dir: &Path) -> Self {
        Self {
            review_timeout_s: DEFAULT_REVIEW_TIMEOUT_S,
            review_poll_s: DEFAULT_REVIEW_POLL_S,
            ci_timeout_s: DEFAULT_CI_TIMEOUT_S,
            ci_poll_s: DEFAULT_CI_POLL_S,
            main_build_timeout_s: DEFAULT_MAIN_BUILD_TIMEOUT_S,
            main_build_poll_s: DEFAULT_MAIN_BUILD_POLL_S,
            max_retries: DEFAULT_MAX_RETRIES,
            status_dir: base_dir.join("status"),
        }
    }

    pub fn load(base_dir: &Path) -> Self {
        let mut cfg = Self::default_for(base_dir);
        let map = read_kv_file(&base_dir.join("config"));

        override_u64(&map, "review_timeout_s", "PIPELINE_REVIEW_TIMEOUT_S", &mut cfg.review_timeout_s);
        override_u64(&map, "review_poll_s", "PIPELINE_REVIEW_POLL_S", &mut cfg.review_poll_s);
        override_u64(&map, "ci_timeout_s", "PIPELINE_CI_TIMEOUT_S", &mut cfg.ci_timeout_s);
        override_u64(&map, "ci_poll_s", "PIPELINE_CI_POLL_S", &mut cfg.ci_poll_s);
        override_u64(&map, "main_build_timeout_s", "PIPELINE_MAIN_BUILD_TIMEOUT_S", &mut cfg.main_build_timeout_s);
        override_u64(&map, "main_build_poll_s", "PIPELINE_MAIN_BUILD_POLL_S", &mut cfg.main_build_poll_s);
        override_u32(&map, "max_retries", "PIPELINE_MAX_RETRIES", &mut cfg.max_retries);

        cfg
    }
}
