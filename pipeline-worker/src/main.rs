use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use pipeline_core::codegen::ClaudeCliCodegen;
use pipeline_core::config::WorkerConfig;
use pipeline_core::escalation::EscalationSink;
use pipeline_core::issue_source::{GhCliIssueSource, IssueSourceClient};
use pipeline_core::status_store::{EscalationLog, FileStatusStore, NotificationJournal};
use pipeline_core::vcs::GitCliVcs;
use pipeline_core::worker_fsm::{WorkerOutcome, WorkerRuntime};

#[derive(Parser)]
#[command(name = "worker", version, about = "Drives a single issue to merge")]
struct Cli {
    #[arg(long, default_value = "~/.pipeline")]
    base_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one issue through the full implement-to-merge lifecycle.
    Run {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        issue: u64,
    },
    /// Print the on-disk snapshot for one issue.
    Status {
        #[arg(long)]
        issue: u64,
    },
    /// List every worker snapshot on disk, terminal or not.
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
        Commands::Run { repo, issue } => {
            let config = WorkerConfig::load(&base_dir);
            let issue_source = GhCliIssueSource::new();
            let codegen = ClaudeCliCodegen::default();
            let vcs = GitCliVcs::new();

            let notifications = NotificationJournal::new(base_dir.join("notifications.jsonl"));
            let escalations = EscalationSink::new(EscalationLog::new(base_dir.join("escalations.jsonl")));

            let issue_info = issue_source.get_issue(&repo, issue)?;
            let runtime = WorkerRuntime::new(
                &issue_source,
                &codegen,
                &vcs,
                config,
                base_dir.join("repos"),
                base_dir.join("worktrees"),
                notifications,
                escalations,
            );

            let outcome = runtime.run(&repo, &issue_info)?;
            match outcome {
                WorkerOutcome::Completed { main_branch_verified } => {
                    println!("completed (main_branch_verified={main_branch_verified})");
                    Ok(())
                }
                WorkerOutcome::Failed { message } => {
                    eprintln!("failed: {message}");
                    std::process::exit(1);
                }
                WorkerOutcome::Blocked { reason } => {
                    eprintln!("blocked: {reason}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Status { issue } => {
            let config = WorkerConfig::load(&base_dir);
            let store = FileStatusStore::new(config.status_dir);
            match store.read_worker(issue) {
                Some(snapshot) => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    Ok(())
                }
                None => {
                    eprintln!("no snapshot found for issue #{issue}");
                    std::process::exit(1);
                }
            }
        }
        Commands::List => {
            let config = WorkerConfig::load(&base_dir);
            let store = FileStatusStore::new(config.status_dir);
            for snapshot in store.list_worker_snapshots() {
                println!("#{} phase={:?} branch={}", snapshot.issue_number, snapshot.phase, snapshot.branch);
            }
            Ok(())
        }
    }
}
