//! Port over the code-generation engine, with a subprocess adapter that
//! shells out to a `claude`-style CLI the same way the rest of this crate
//! shells out to `git`/`gh`/`docker` rather than linking an SDK.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Tools a codegen run is allowed to invoke. Kept as a closed set so a
/// prompt template can never accidentally widen its own blast radius.
pub const ALLOWED_TOOLS: &[&str] = &["read", "write", "edit", "glob", "grep", "shell"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenOutcome {
    Success,
    Error(String),
}

pub trait CodegenDriver {
    /// Run a codegen prompt with a bounded wall-clock timeout, logging raw
    /// output to `log_path`.
    fn run(&self, prompt: &str, cwd: &Path, timeout_s: u64, log_path: &Path) -> Result<CodegenOutcome>;
}

/// Invokes a `claude`-compatible CLI binary, wrapped in `timeout` the same
/// way container launches elsewhere in this crate are wrapped.
pub struct ClaudeCliCodegen {
    binary: String,
}

impl ClaudeCliCodegen {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for ClaudeCliCodegen {
    fn default() -> Self {
        Self::new("claude")
    }
}

impl CodegenDriver for ClaudeCliCodegen {
    fn run(&self, prompt: &str, cwd: &Path, timeout_s: u64, log_path: &Path) -> Result<CodegenOutcome> {
        let log_file = File::create(log_path)
            .with_context(|| format!("failed to create log file {}", log_path.display()))?;
        let stderr_file = log_file
            .try_clone()
            .context("failed to clone log file handle for stderr")?;

        let status = Command::new("timeout")
            .arg(timeout_s.to_string())
            .arg(&self.binary)
            .arg("--print")
            .arg("--allowed-tools")
            .arg(ALLOWED_TOOLS.join(","))
            .arg(prompt)
            .current_dir(cwd)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .status()
            .context("failed to spawn codegen process")?;

        if status.success() {
            Ok(CodegenOutcome::Success)
        } else if status.code() == Some(124) {
            Ok(CodegenOutcome::Error("codegen run timed out".to_string()))
        } else {
            Ok(CodegenOutcome::Error(format!("codegen exited with {status}")))
        }
    }
}

/// Every worker-driven prompt carries this clause verbatim so lint/typecheck/
/// test/CI configuration is never in scope for an automated edit.
pub const CONFIG_MODIFICATION_PROHIBITION: &str =
    "Do not modify lint, typecheck, test, or CI configuration files (e.g. \
     eslint config, tsconfig, pytest.ini, pyproject.toml tool sections, or \
     workflow YAML) to make checks pass. Fix the underlying code instead.";

pub fn implement_feature_prompt(issue_title: &str, issue_body: &str) -> String {
    format!(
        "Implement the following issue.\n\nTitle: {issue_title}\n\n{issue_body}\n\n{}",
        CONFIG_MODIFICATION_PROHIBITION
    )
}

pub fn fix_validation_prompt(failure_output: &str) -> String {
    format!(
        "The validation step failed with the following output:\n\n{failure_output}\n\n\
         Fix the code so validation passes.\n\n{}",
        CONFIG_MODIFICATION_PROHIBITION
    )
}

pub fn address_review_feedback_prompt(feedback: &[String]) -> String {
    format!(
        "Address the following review feedback:\n\n{}\n\n{}",
        feedback.join("\n- "),
        CONFIG_MODIFICATION_PROHIBITION
    )
}

pub fn fix_ci_failures_prompt(ci_log: &str) -> String {
    format!(
        "CI failed with the following output:\n\n{ci_log}\n\nFix the failure.\n\n{}",
        CONFIG_MODIFICATION_PROHIBITION
    )
}
