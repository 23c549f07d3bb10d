use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use pipeline_core::config::SupervisorConfig;
use pipeline_core::escalation::EscalationSink;
use pipeline_core::event_log::EventLog;
use pipeline_core::issue_source::GhCliIssueSource;
use pipeline_core::lock::RunLock;
use pipeline_core::pool::WorkerPool;
use pipeline_core::status_store::{EscalationLog, FileStatusStore};
use pipeline_core::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "supervisor", version, about = "Polls issues and schedules workers toward merge")]
struct Cli {
    /// Base directory for status files, locks, and logs.
    #[arg(long, default_value = "~/.pipeline")]
    base_dir: String,

    /// Path to the worker binary to spawn.
    #[arg(long, default_value = "worker")]
    worker_binary: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling loop.
    Run {
        #[arg(long)]
        repo: String,
        /// Run exactly one poll/assign/reconcile tick, then exit.
        #[arg(long)]
        once: bool,
        /// Kill any existing instance holding the lock for this repo.
        #[arg(long)]
        force: bool,
    },
    /// Print the current status of every tracked worker.
    Status {
        #[arg(long)]
        repo: String,
    },
    /// List active (non-terminal) worker snapshots.
    List,
}

fn expand_base_dir(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = expand_base_dir(&cli.base_dir);

    match cli.command {
        Commands::Run { repo, once, force } => {
            let _lock = RunLock::acquire(&base_dir, &repo.replace('/', "--"), force)?;
            let config = SupervisorConfig::load(&base_dir);
            let issue_source = GhCliIssueSource::new();
            let pool = WorkerPool::new(
                config.max_workers,
                cli.worker_binary.clone(),
                config.status_dir.clone(),
                config.worker_timeout_s,
            );
            let escalations = EscalationSink::new(EscalationLog::new(base_dir.join("escalations.jsonl")));
            let event_log = EventLog::open(&base_dir.join("logs"));
            let mut supervisor = Supervisor::new(&issue_source, pool, escalations, event_log, config, repo);
            supervisor.run(once)
        }
        Commands::Status { repo } => {
            let config = SupervisorConfig::load(&base_dir);
            let store = FileStatusStore::new(config.status_dir);
            for snapshot in store.list_worker_snapshots() {
                println!("#{:<6} {:?}  branch={}", snapshot.issue_number, snapshot.phase, snapshot.branch);
            }
            let _ = repo;
            Ok(())
        }
        Commands::List => {
            let config = SupervisorConfig::load(&base_dir);
            let store = FileStatusStore::new(config.status_dir);
            for snapshot in store.list_worker_snapshots() {
                if !snapshot.phase.is_terminal() {
                    println!("#{} pid={} phase={:?}", snapshot.issue_number, snapshot.pid, snapshot.phase);
                }
            }
            Ok(())
        }
    }
}
