//! Version-control port, with a `git`-CLI adapter. No `git2` binding is used
//! anywhere in this crate's ancestry — every version-control and container
//! operation in the rest of the pack shells out, so this does too.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

pub trait VcsDriver {
    /// Create (or reuse) an isolated working tree on `branch`, branching
    /// from `base_branch` if `branch` does not already exist.
    fn initialize_worktree(&self, repo_path: &Path, worktree_path: &Path, branch: &str, base_branch: &str) -> Result<()>;
    /// Commit all pending changes. A no-op (returns `Ok(None)`) when the
    /// working tree is clean.
    fn commit(&self, worktree_path: &Path, message: &str) -> Result<Option<String>>;
    fn push(&self, worktree_path: &Path, branch: &str) -> Result<()>;
    fn has_conflicts(&self, worktree_path: &Path, base_branch: &str) -> Result<bool>;
    fn rebase_on(&self, worktree_path: &Path, base_branch: &str) -> Result<bool>;
    fn changed_files(&self, worktree_path: &Path) -> Result<Vec<String>>;
    fn cleanup(&self, repo_path: &Path, worktree_path: &Path) -> Result<()>;
}

pub struct GitCliVcs;

impl GitCliVcs {
    pub fn new() -> Self {
        Self
    }

    fn run(repo_path: &Path, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .current_dir(repo_path)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git {:?}", args))
    }

    fn branch_exists_on_remote(repo_path: &Path, branch: &str) -> Result<bool> {
        let out = Self::run(repo_path, &["branch", "-r"])?;
        let listing = String::from_utf8_lossy(&out.stdout);
        Ok(listing.lines().any(|l| l.trim().ends_with(&format!("origin/{branch}"))))
    }
}

impl Default for GitCliVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsDriver for GitCliVcs {
    fn initialize_worktree(&self, repo_path: &Path, worktree_path: &Path, branch: &str, base_branch: &str) -> Result<()> {
        Self::run(repo_path, &["fetch", "origin"])?;

        let worktree_str = worktree_path.to_string_lossy().into_owned();
        let status = if Self::branch_exists_on_remote(repo_path, branch)? {
            Command::new("git")
                .current_dir(repo_path)
                .args(["worktree", "add", &worktree_str, branch])
                .status()
        } else {
            Command::new("git")
                .current_dir(repo_path)
                .args(["worktree", "add", "-b", branch, &worktree_str, &format!("origin/{base_branch}")])
                .status()
        }
        .context("failed to spawn git worktree add")?;

        if !status.success() {
            bail!("git worktree add failed for branch {branch}");
        }
        Ok(())
    }

    fn commit(&self, worktree_path: &Path, message: &str) -> Result<Option<String>> {
        let status_out = Self::run(worktree_path, &["status", "--porcelain"])?;
        if String::from_utf8_lossy(&status_out.stdout).trim().is_empty() {
            return Ok(None);
        }
        Self::run(worktree_path, &["add", "-A"])?;
        let commit_status = Command::new("git")
            .current_dir(worktree_path)
            .args(["commit", "-m", message])
            .status()
            .context("failed to spawn git commit")?;
        if !commit_status.success() {
            bail!("git commit failed");
        }
        let rev_out = Self::run(worktree_path, &["rev-parse", "HEAD"])?;
        Ok(Some(String::from_utf8_lossy(&rev_out.stdout).trim().to_string()))
    }

    fn push(&self, worktree_path: &Path, branch: &str) -> Result<()> {
        let status = Command::new("git")
            .current_dir(worktree_path)
            .args(["push", "--set-upstream", "origin", branch])
            .status()
            .context("failed to spawn git push")?;
        if !status.success() {
            bail!("git push failed for branch {branch}");
        }
        Ok(())
    }

    fn has_conflicts(&self, worktree_path: &Path, base_branch: &str) -> Result<bool> {
        let merge_status = Command::new("git")
            .current_dir(worktree_path)
            .args(["merge", "--no-commit", "--no-ff", &format!("origin/{base_branch}")])
            .status()
            .context("failed to spawn git merge (conflict probe)")?;
        let conflicted = !merge_status.success();
        Self::run(worktree_path, &["merge", "--abort"]).ok();
        Ok(conflicted)
    }

    fn rebase_on(&self, worktree_path: &Path, base_branch: &str) -> Result<bool> {
        let status = Command::new("git")
            .current_dir(worktree_path)
            .args(["rebase", &format!("origin/{base_branch}")])
            .status()
            .context("failed to spawn git rebase")?;
        if status.success() {
            Ok(true)
        } else {
            Self::run(worktree_path, &["rebase", "--abort"]).ok();
            Ok(false)
        }
    }

    fn changed_files(&self, worktree_path: &Path) -> Result<Vec<String>> {
        let out = Self::run(worktree_path, &["diff", "--name-only", "HEAD~1"])?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    fn cleanup(&self, repo_path: &Path, worktree_path: &Path) -> Result<()> {
        let worktree_str = worktree_path.to_string_lossy().into_owned();
        let status = Command::new("git")
            .current_dir(repo_path)
            .args(["worktree", "remove", "--force", &worktree_str])
            .status();
        if status.map(|s| !s.success()).unwrap_or(true) {
            // Worktree metadata may already be gone; fall back to a plain
            // directory removal so cleanup is never blocked on git's bookkeeping.
            let _ = std::fs::remove_dir_all(worktree_path);
        }
        Ok(())
    }
}

pub fn worktree_path(base_dir: &Path, issue_number: u64) -> PathBuf {
    base_dir.join(format!("issue-{issue_number}"))
}

pub fn branch_name(issue_number: u64) -> String {
    format!("worker/issue-{issue_number}")
}
