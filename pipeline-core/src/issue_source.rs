//! Port for the issue tracker, with a `gh`-CLI adapter.
//!
//! Shelling out to `gh` rather than linking a GitHub API crate means this
//! binary has no separate auth story: it inherits whatever `gh auth login`
//! session the operator already has.

use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::{ChangeRequest, CombinedCheckStatus, Issue, Mergeable, Review, ReviewComment, ReviewVerdict};

pub trait IssueSourceClient {
    /// All open issues, unfiltered — label/skip-label admission filtering
    /// and the linked-change-request check happen at the supervisor layer.
    fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>>;
    fn get_issue(&self, repo: &str, number: u64) -> Result<Issue>;
    fn find_open_change_request_for_branch(&self, repo: &str, branch: &str) -> Result<Option<ChangeRequest>>;
    fn create_change_request(&self, repo: &str, branch: &str, title: &str, body: &str) -> Result<ChangeRequest>;
    fn list_reviews(&self, repo: &str, pr_number: u64) -> Result<Vec<Review>>;
    fn list_issue_comments(&self, repo: &str, issue_number: u64) -> Result<Vec<ReviewComment>>;
    fn combined_check_status(&self, repo: &str, pr_number: u64) -> Result<CombinedCheckStatus>;
    fn mergeable(&self, repo: &str, pr_number: u64) -> Result<Mergeable>;
    fn merge(&self, repo: &str, pr_number: u64) -> Result<()>;
    fn create_issue(&self, repo: &str, title: &str, body: &str, labels: &[&str]) -> Result<u64>;
    fn transition_label(&self, repo: &str, issue_number: u64, remove: Option<&str>, add: Option<&str>) -> Result<()>;
}

const MAX_RETRIES: u32 = 3;

/// `gh`-CLI-backed issue source. Transient subprocess failures (the process
/// failed to start, or exited non-zero with no recognizable reason) are
/// retried with linear backoff; a clearly semantic failure (not found, no
/// permission) is returned immediately.
pub struct GhCliIssueSource;

impl GhCliIssueSource {
    pub fn new() -> Self {
        Self
    }

    fn gh_output(&self, args: &[&str]) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match Command::new("gh").args(args).output() {
                Ok(out) if out.status.success() => {
                    return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                    if stderr.contains("not found") || stderr.contains("permission") {
                        bail!("gh {:?} failed: {}", args, stderr);
                    }
                    last_err = Some(stderr);
                }
                Err(e) => last_err = Some(e.to_string()),
            }
            if attempt + 1 < MAX_RETRIES {
                thread::sleep(Duration::from_millis(300 * (attempt as u64 + 1)));
            }
        }
        bail!("gh {:?} failed after {} attempts: {}", args, MAX_RETRIES, last_err.unwrap_or_default());
    }
}

impl Default for GhCliIssueSource {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    labels: Vec<GhLabel>,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhPr {
    number: u64,
    url: String,
    #[serde(rename = "headRefName")]
    head_ref_name: String,
}

impl IssueSourceClient for GhCliIssueSource {
    fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>> {
        let out = self.gh_output(&[
            "issue", "list", "--repo", repo, "--state", "open",
            "--json", "number,title,body,labels",
        ])?;
        let raw: Vec<GhIssue> = serde_json::from_str(&out).context("parsing gh issue list output")?;
        Ok(raw
            .into_iter()
            .map(|i| {
                Issue::new(
                    repo,
                    i.number,
                    i.title,
                    i.body.unwrap_or_default(),
                    i.labels.into_iter().map(|l| l.name).collect(),
                )
            })
            .collect())
    }

    fn get_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        let out = self.gh_output(&[
            "issue", "view", &number.to_string(), "--repo", repo,
            "--json", "number,title,body,labels",
        ])?;
        let raw: GhIssue = serde_json::from_str(&out).context("parsing gh issue view output")?;
        Ok(Issue::new(
            repo,
            raw.number,
            raw.title,
            raw.body.unwrap_or_default(),
            raw.labels.into_iter().map(|l| l.name).collect(),
        ))
    }

    fn find_open_change_request_for_branch(&self, repo: &str, branch: &str) -> Result<Option<ChangeRequest>> {
        let out = self.gh_output(&[
            "pr", "list", "--repo", repo, "--head", branch, "--state", "all",
            "--json", "number,url,headRefName",
        ])?;
        let raw: Vec<GhPr> = serde_json::from_str(&out).context("parsing gh pr list output")?;
        Ok(raw.into_iter().next().map(|p| ChangeRequest {
            number: p.number,
            url: p.url,
            branch: p.head_ref_name,
        }))
    }

    /// Idempotent: a 422-class "already exists" failure from `gh pr create`
    /// falls through to looking up the existing PR for this branch, rather
    /// than propagating the error.
    fn create_change_request(&self, repo: &str, branch: &str, title: &str, body: &str) -> Result<ChangeRequest> {
        let result = Command::new("gh")
            .args([
                "pr", "create", "--repo", repo, "--head", branch,
                "--title", title, "--body", body, "--json", "number,url,headRefName",
            ])
            .output();

        match result {
            Ok(out) if out.status.success() => {
                let raw: GhPr = serde_json::from_str(&String::from_utf8_lossy(&out.stdout))
                    .context("parsing gh pr create output")?;
                Ok(ChangeRequest {
                    number: raw.number,
                    url: raw.url,
                    branch: raw.head_ref_name,
                })
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                if stderr.contains("already exists") || stderr.contains("A pull request") {
                    if let Some(existing) = self.find_open_change_request_for_branch(repo, branch)? {
                        return Ok(existing);
                    }
                }
                bail!("gh pr create failed: {}", stderr);
            }
            Err(e) => bail!("failed to run gh pr create: {}", e),
        }
    }

    fn list_reviews(&self, repo: &str, pr_number: u64) -> Result<Vec<Review>> {
        let out = self.gh_output(&[
            "pr", "view", &pr_number.to_string(), "--repo", repo,
            "--json", "reviews",
        ])?;
        let parsed: serde_json::Value = serde_json::from_str(&out)?;
        let mut reviews = Vec::new();
        if let Some(arr) = parsed.get("reviews").and_then(|v| v.as_array()) {
            for r in arr {
                let id = r.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
                let author = r
                    .get("author")
                    .and_then(|a| a.get("login"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let state = r.get("state").and_then(|v| v.as_str()).unwrap_or("");
                let body = r.get("body").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let verdict = match state {
                    "APPROVED" => ReviewVerdict::Approved,
                    "CHANGES_REQUESTED" => ReviewVerdict::ChangesRequested,
                    _ => ReviewVerdict::Commented,
                };
                reviews.push(Review { id, author, verdict, body, comments: vec![] });
            }
        }
        Ok(reviews)
    }

    fn list_issue_comments(&self, repo: &str, issue_number: u64) -> Result<Vec<ReviewComment>> {
        let out = self.gh_output(&[
            "issue", "view", &issue_number.to_string(), "--repo", repo,
            "--json", "comments",
        ])?;
        let parsed: serde_json::Value = serde_json::from_str(&out)?;
        let mut comments = Vec::new();
        if let Some(arr) = parsed.get("comments").and_then(|v| v.as_array()) {
            for (idx, c) in arr.iter().enumerate() {
                let author = c
                    .get("author")
                    .and_then(|a| a.get("login"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let body = c.get("body").and_then(|v| v.as_str()).unwrap_or("").to_string();
                comments.push(ReviewComment {
                    id: idx as u64,
                    author,
                    body,
                    path: None,
                    line: None,
                });
            }
        }
        Ok(comments)
    }

    fn combined_check_status(&self, repo: &str, pr_number: u64) -> Result<CombinedCheckStatus> {
        let out = self.gh_output(&[
            "pr", "checks", &pr_number.to_string(), "--repo", repo,
        ]);
        // `gh pr checks` exits non-zero when checks are failing or pending;
        // fall back to output inspection rather than treating that as fatal.
        let text = match out {
            Ok(t) => t,
            Err(_) => String::new(),
        };
        if text.contains("fail") {
            Ok(CombinedCheckStatus::Failure)
        } else if text.contains("pending") {
            Ok(CombinedCheckStatus::Pending)
        } else {
            Ok(CombinedCheckStatus::Success)
        }
    }

    fn mergeable(&self, repo: &str, pr_number: u64) -> Result<Mergeable> {
        let out = self.gh_output(&[
            "pr", "view", &pr_number.to_string(), "--repo", repo,
            "--json", "mergeable",
        ])?;
        let parsed: serde_json::Value = serde_json::from_str(&out)?;
        Ok(match parsed.get("mergeable").and_then(|v| v.as_str()) {
            Some("MERGEABLE") => Mergeable::Mergeable,
            Some("CONFLICTING") => Mergeable::Conflicting,
            _ => Mergeable::Unknown,
        })
    }

    fn merge(&self, repo: &str, pr_number: u64) -> Result<()> {
        self.gh_output(&[
            "pr", "merge", &pr_number.to_string(), "--repo", repo, "--squash", "--delete-branch",
        ])?;
        Ok(())
    }

    fn create_issue(&self, repo: &str, title: &str, body: &str, labels: &[&str]) -> Result<u64> {
        let mut args = vec!["issue", "create", "--repo", repo, "--title", title, "--body", body];
        for label in labels {
            args.push("--label");
            args.push(label);
        }
        let out = self.gh_output(&args)?;
        let url = out.trim();
        url.rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .context("could not parse issue number from gh issue create output")
    }

    fn transition_label(&self, repo: &str, issue_number: u64, remove: Option<&str>, add: Option<&str>) -> Result<()> {
        let issue = issue_number.to_string();
        if let Some(remove) = remove {
            // Removing a label that is already absent is not an error worth
            // surfacing — the issue may have been relabeled by a human.
            let _ = Command::new("gh")
                .args(["issue", "edit", &issue, "--repo", repo, "--remove-label", remove])
                .status();
        }
        if let Some(add) = add {
            self.gh_output(&["issue", "edit", &issue, "--repo", repo, "--add-label", add])?;
        }
        Ok(())
    }
}
