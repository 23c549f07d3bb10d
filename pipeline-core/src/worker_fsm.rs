//! Worker phase machine: drives one issue from `Initializing` through to a
//! terminal phase (`Completed`, `Failed`, or `Blocked`).
//!
//! Modeled as a tagged `WorkerPhase` enum with an `enter(phase) -> next_phase`
//! dispatch table rather than an inheritance hierarchy — each phase's
//! handling lives in its own method on [`WorkerRuntime`], and the outer loop
//! in [`WorkerRuntime::run`] just keeps calling `enter` until a terminal
//! phase comes back.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use crate::codegen::{
    address_review_feedback_prompt, fix_ci_failures_prompt, fix_validation_prompt,
    implement_feature_prompt, CodegenDriver, CodegenOutcome,
};
use crate::config::WorkerConfig;
use crate::escalation::EscalationSink;
use crate::issue_source::IssueSourceClient;
use crate::model::{
    CiStatus, CombinedCheckStatus, Issue, LogEntry, LogLevel, Mergeable, Notification,
    NotificationCategory, ReviewState, WorkerPhase, WorkerSnapshot,
};
use crate::review::{blocks_merge, partition_comments, FeedbackCursor};
use crate::status_store::{FileStatusStore, NotificationJournal};
use crate::vcs::{branch_name, worktree_path, VcsDriver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed { main_branch_verified: bool },
    Failed { message: String },
    Blocked { reason: String },
}

/// What a manifest file in the worktree tells us about how to validate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManifestKind {
    Node,
    Python,
    Unknown,
}

fn detect_manifest_kind(worktree_path: &std::path::Path) -> ManifestKind {
    if worktree_path.join("package.json").exists() {
        ManifestKind::Node
    } else if worktree_path.join("pyproject.toml").exists() {
        ManifestKind::Python
    } else {
        ManifestKind::Unknown
    }
}

fn validation_commands(kind: ManifestKind) -> Vec<Vec<&'static str>> {
    match kind {
        ManifestKind::Node => vec![
            vec!["npm", "run", "lint"],
            vec!["npm", "run", "typecheck"],
            vec!["npm", "test"],
        ],
        ManifestKind::Python => vec![
            vec!["uv", "run", "ruff", "check"],
            vec!["uv", "run", "mypy", "."],
            vec!["uv", "run", "pytest"],
        ],
        ManifestKind::Unknown => vec![],
    }
}

fn run_validation(worktree: &std::path::Path, kind: ManifestKind) -> Result<Option<String>> {
    for cmd in validation_commands(kind) {
        let (program, args) = cmd.split_first().expect("validation command is non-empty");
        let output = std::process::Command::new(program)
            .args(args)
            .current_dir(worktree)
            .output()?;
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Ok(Some(combined));
        }
    }
    Ok(None)
}

/// Outcome of one pass through `checking_ci`.
enum CiResult {
    /// CI is green, proceed to `resolving_conflicts`.
    Success,
    /// CI failed and the one fix attempt was just spent; loop back to
    /// `awaiting_review` for a fresh review cycle against the fix commit.
    RetryReview,
    /// CI failed a second time with the fix budget already spent.
    Blocked(WorkerOutcome),
}

pub struct WorkerRuntime<'a, I, C, V> {
    issue_source: &'a I,
    codegen: &'a C,
    vcs: &'a V,
    status_store: FileStatusStore,
    notifications: NotificationJournal,
    escalations: EscalationSink,
    config: WorkerConfig,
    repos_dir: PathBuf,
    worktrees_dir: PathBuf,
}

impl<'a, I, C, V> WorkerRuntime<'a, I, C, V>
where
    I: IssueSourceClient,
    C: CodegenDriver,
    V: VcsDriver,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        issue_source: &'a I,
        codegen: &'a C,
        vcs: &'a V,
        config: WorkerConfig,
        repos_dir: PathBuf,
        worktrees_dir: PathBuf,
        notifications: NotificationJournal,
        escalations: EscalationSink,
    ) -> Self {
        let status_store = FileStatusStore::new(config.status_dir.clone());
        Self {
            issue_source,
            codegen,
            vcs,
            status_store,
            notifications,
            escalations,
            config,
            repos_dir,
            worktrees_dir,
        }
    }

    fn now() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    fn persist(&self, snapshot: &WorkerSnapshot) {
        // Best-effort: a status write failure must not stop the worker from
        // making forward progress toward a terminal phase, since the manager
        // can always re-derive liveness from the process itself.
        let _ = self.status_store.write_worker(snapshot);
    }

    fn log(&self, snapshot: &mut WorkerSnapshot, level: LogLevel, message: impl Into<String>) {
        snapshot.logs.push(LogEntry { ts: Self::now(), level, message: message.into() });
        snapshot.updated_at = Self::now();
    }

    /// Emit a notification for a terminal (or otherwise user-facing) event.
    /// Best-effort, same as `persist` — a notification write failure must
    /// never block forward progress.
    fn notify(&self, issue_number: u64, category: NotificationCategory, message: impl Into<String>, metadata: serde_json::Value) {
        let notification = Notification {
            ts: Self::now(),
            issue_number,
            category,
            message: message.into(),
            metadata,
        };
        let _ = self.notifications.append(&notification);
    }

    /// Drive `issue` through the full lifecycle to a terminal outcome.
    pub fn run(&self, repo: &str, issue: &Issue) -> Result<WorkerOutcome> {
        let branch = branch_name(issue.number);
        let repo_path = self.repos_dir.join(repo.replace('/', "--"));
        let worktree = worktree_path(&self.worktrees_dir, issue.number);

        let mut snapshot = WorkerSnapshot {
            pid: std::process::id(),
            issue_number: issue.number,
            branch: branch.clone(),
            worktree_path: worktree.to_string_lossy().into_owned(),
            phase: WorkerPhase::Initializing,
            started_at: Self::now(),
            updated_at: Self::now(),
            commits: vec![],
            pr_number: None,
            pr_url: None,
            review_status: None,
            ci_status: None,
            blocked_reason: None,
            created_issues: vec![],
            logs: vec![],
            main_branch_verified: false,
        };
        // Written before any external side effect so a crash immediately
        // after spawn still leaves a discoverable record for the pool.
        self.persist(&snapshot);

        // A worktree we can't allocate is fatal, not a gracefully reported
        // blocked state: the process exits non-zero and the pool's liveness
        // check reports `DiedWithoutTerminalPhase`.
        self.vcs.initialize_worktree(&repo_path, &worktree, &branch, "main")?;

        let mut retries_left = self.config.max_retries;
        let mut ci_retry_used = false;
        let mut feedback_cursor = FeedbackCursor::new();

        snapshot.phase = WorkerPhase::Implementing;
        self.persist(&snapshot);
        let implement_outcome = self.codegen.run(
            &implement_feature_prompt(&issue.title, &issue.body),
            &worktree,
            self.config.review_timeout_s,
            &worktree.join(".pipeline-codegen.log"),
        )?;
        if let CodegenOutcome::Error(detail) = implement_outcome {
            return self.finish_blocked(&mut snapshot, format!("Failed to implement feature: {detail}"));
        }

        if let Some(outcome) = self.validate_and_fix(&worktree, &mut snapshot)? {
            return self.finish(&mut snapshot, outcome, &repo_path, &worktree);
        }

        let commit_sha = self.vcs.commit(&worktree, &format!("Implement feature for issue #{}", issue.number))?;
        if let Some(sha) = commit_sha {
            snapshot.commits.push(sha);
        }
        self.vcs.push(&worktree, &branch)?;

        snapshot.phase = WorkerPhase::CreatingCr;
        self.persist(&snapshot);
        let cr = self.issue_source.create_change_request(
            repo,
            &branch,
            &issue.title,
            &format!("Closes #{}", issue.number),
        )?;
        snapshot.pr_number = Some(cr.number);
        snapshot.pr_url = Some(cr.url.clone());
        self.persist(&snapshot);

        loop {
            snapshot.phase = WorkerPhase::AwaitingReview;
            self.persist(&snapshot);

            let review_outcome = self.await_review(
                repo,
                cr.number,
                &worktree,
                &mut snapshot,
                &mut feedback_cursor,
            )?;
            if let Some(outcome) = review_outcome {
                return self.finish(&mut snapshot, outcome, &repo_path, &worktree);
            }

            snapshot.phase = WorkerPhase::CheckingCi;
            self.persist(&snapshot);
            match self.check_ci(repo, cr.number, &worktree, &mut snapshot, &mut ci_retry_used)? {
                CiResult::Success => {}
                CiResult::RetryReview => continue,
                CiResult::Blocked(outcome) => {
                    return self.finish(&mut snapshot, outcome, &repo_path, &worktree);
                }
            }

            snapshot.phase = WorkerPhase::ResolvingConflicts;
            self.persist(&snapshot);
            match self.issue_source.mergeable(repo, cr.number)? {
                Mergeable::Conflicting => {
                    if !self.vcs.rebase_on(&worktree, "main")? {
                        let outcome = WorkerOutcome::Blocked {
                            reason: "Merge conflicts require manual resolution".to_string(),
                        };
                        return self.finish(&mut snapshot, outcome, &repo_path, &worktree);
                    }
                    self.vcs.push(&worktree, &branch)?;
                    continue;
                }
                Mergeable::Mergeable | Mergeable::Unknown => {}
            }

            snapshot.phase = WorkerPhase::Merging;
            self.persist(&snapshot);
            match self.issue_source.merge(repo, cr.number) {
                Ok(()) => break,
                Err(e) => {
                    if retries_left == 0 {
                        let outcome = WorkerOutcome::Blocked { reason: "Exhausted retry attempts".to_string() };
                        return self.finish(&mut snapshot, outcome, &repo_path, &worktree);
                    }
                    retries_left -= 1;
                    self.log(&mut snapshot, LogLevel::Warn, format!("merge attempt failed: {e}"));
                    continue;
                }
            }
        }

        snapshot.phase = WorkerPhase::VerifyingMain;
        self.persist(&snapshot);
        let verified = self.verify_main(repo, &mut snapshot)?;
        let outcome = match verified {
            MainVerification::Verified => {
                snapshot.main_branch_verified = true;
                WorkerOutcome::Completed { main_branch_verified: true }
            }
            MainVerification::Regressed => {
                WorkerOutcome::Failed { message: "post-merge main branch build regressed".to_string() }
            }
            MainVerification::TimedOut => {
                // Timeout is not treated as a regression: the merge itself
                // succeeded, only verification was inconclusive. No escalation.
                snapshot.main_branch_verified = false;
                WorkerOutcome::Completed { main_branch_verified: false }
            }
        };
        self.finish(&mut snapshot, outcome, &repo_path, &worktree)
    }

    /// Apply a terminal outcome to the snapshot, persist, notify, escalate
    /// where the outcome calls for it, and clean up the worktree on
    /// `completed`/`failed` (but not `blocked`, where state is preserved for
    /// human intervention).
    fn finish(
        &self,
        snapshot: &mut WorkerSnapshot,
        outcome: WorkerOutcome,
        repo_path: &std::path::Path,
        worktree: &std::path::Path,
    ) -> Result<WorkerOutcome> {
        match &outcome {
            WorkerOutcome::Completed { main_branch_verified } => {
                snapshot.phase = WorkerPhase::Completed;
                snapshot.main_branch_verified = *main_branch_verified;
                self.persist(snapshot);
                self.notify(
                    snapshot.issue_number,
                    NotificationCategory::Completed,
                    "Issue implemented and merged",
                    json!({"main_branch_verified": main_branch_verified, "pr_number": snapshot.pr_number}),
                );
                let _ = self.vcs.cleanup(repo_path, worktree);
            }
            WorkerOutcome::Failed { message } => {
                // The only path that produces a terminal `Failed` outcome is
                // a post-merge main-branch regression (a worker that dies
                // any other way never reaches `finish` at all — the
                // supervisor observes that as `DiedWithoutTerminalPhase` and
                // escalates `failed` itself).
                snapshot.phase = WorkerPhase::Failed;
                self.persist(snapshot);
                let pr_number = snapshot.pr_number.unwrap_or(0);
                self.escalations.escalate_post_merge_regression(snapshot.issue_number, pr_number)?;
                self.notify(
                    snapshot.issue_number,
                    NotificationCategory::PostMergeFailed,
                    message.clone(),
                    json!({"requires_response": true, "pr_number": pr_number}),
                );
                let _ = self.vcs.cleanup(repo_path, worktree);
            }
            WorkerOutcome::Blocked { reason } => {
                snapshot.phase = WorkerPhase::Blocked;
                snapshot.blocked_reason = Some(reason.clone());
                self.persist(snapshot);
                self.escalations.escalate_blocked(snapshot.issue_number, reason)?;
                self.notify(snapshot.issue_number, NotificationCategory::Blocked, reason.clone(), json!({}));
            }
        }
        Ok(outcome)
    }

    fn finish_blocked(&self, snapshot: &mut WorkerSnapshot, reason: String) -> Result<WorkerOutcome> {
        snapshot.phase = WorkerPhase::Blocked;
        snapshot.blocked_reason = Some(reason.clone());
        self.persist(snapshot);
        self.escalations.escalate_blocked(snapshot.issue_number, &reason)?;
        self.notify(snapshot.issue_number, NotificationCategory::Blocked, reason.clone(), json!({}));
        Ok(WorkerOutcome::Blocked { reason })
    }

    fn validate_and_fix(&self, worktree: &std::path::Path, snapshot: &mut WorkerSnapshot) -> Result<Option<WorkerOutcome>> {
        snapshot.phase = WorkerPhase::Validating;
        self.persist(snapshot);
        let kind = detect_manifest_kind(worktree);

        let Some(failure) = run_validation(worktree, kind)? else {
            return Ok(None);
        };

        snapshot.phase = WorkerPhase::FixingValidation;
        self.persist(snapshot);
        self.codegen.run(
            &fix_validation_prompt(&failure),
            worktree,
            self.config.review_timeout_s,
            &worktree.join(".pipeline-codegen.log"),
        )?;
        if let Some(sha) = self.vcs.commit(worktree, "Fix validation failures")? {
            snapshot.commits.push(sha);
        }

        if run_validation(worktree, kind)?.is_some() {
            return Ok(Some(WorkerOutcome::Blocked {
                reason: "Validation failed after retries".to_string(),
            }));
        }
        Ok(None)
    }

    fn await_review(
        &self,
        repo: &str,
        pr_number: u64,
        worktree: &std::path::Path,
        snapshot: &mut WorkerSnapshot,
        cursor: &mut FeedbackCursor,
    ) -> Result<Option<WorkerOutcome>> {
        let deadline = Instant::now() + Duration::from_secs(self.config.review_timeout_s);
        loop {
            let reviews = self.issue_source.list_reviews(repo, pr_number)?;
            let fresh = cursor.take_new(&reviews);
            if !fresh.is_empty() {
                if blocks_merge(&reviews) {
                    snapshot.review_status = Some(ReviewState::ChangesRequested);
                    snapshot.phase = WorkerPhase::AddressingFeedback;
                    self.persist(snapshot);

                    let (blocking, non_blocking) = partition_comments(&fresh);
                    for comment in &non_blocking {
                        let title = format!("Follow-up from review on issue #{}", snapshot.issue_number);
                        let body = match (&comment.path, comment.line) {
                            (Some(path), Some(line)) => format!("{} [{}:{}]", comment.body, path, line),
                            _ => comment.body.clone(),
                        };
                        if let Ok(new_id) = self.issue_source.create_issue(repo, &title, &body, &["follow-up", "from-review"]) {
                            snapshot.created_issues.push(new_id);
                        }
                    }
                    self.persist(snapshot);

                    if !blocking.is_empty() {
                        let feedback: Vec<String> = blocking.iter().map(|c| c.body.clone()).collect();
                        self.codegen.run(
                            &address_review_feedback_prompt(&feedback),
                            worktree,
                            self.config.review_timeout_s,
                            &worktree.join(".pipeline-codegen.log"),
                        )?;
                        if let Some(sha) = self.vcs.commit(worktree, "Address review feedback")? {
                            snapshot.commits.push(sha);
                        }
                        self.vcs.push(worktree, &snapshot.branch)?;
                    }
                    continue;
                } else {
                    let any_approved = fresh.iter().any(|r| r.verdict == crate::model::ReviewVerdict::Approved);
                    snapshot.review_status = Some(if any_approved { ReviewState::Approved } else { ReviewState::Commented });
                    return Ok(None);
                }
            }
            if Instant::now() >= deadline {
                // A silent review timeout is treated as an implicit COMMENTED
                // verdict, not a failure signal — the outer CI/merge loop
                // still governs terminal outcomes.
                snapshot.review_status = Some(ReviewState::Commented);
                return Ok(None);
            }
            thread::sleep(Duration::from_secs(self.config.review_poll_s));
        }
    }

    fn check_ci(
        &self,
        repo: &str,
        pr_number: u64,
        worktree: &std::path::Path,
        snapshot: &mut WorkerSnapshot,
        ci_retry_used: &mut bool,
    ) -> Result<CiResult> {
        let deadline = Instant::now() + Duration::from_secs(self.config.ci_timeout_s);
        loop {
            let status = match self.issue_source.combined_check_status(repo, pr_number)? {
                CombinedCheckStatus::Pending => {
                    if Instant::now() >= deadline {
                        // Pending past timeout is treated as a failure.
                        CombinedCheckStatus::Failure
                    } else {
                        thread::sleep(Duration::from_secs(self.config.ci_poll_s));
                        continue;
                    }
                }
                other => other,
            };

            return match status {
                CombinedCheckStatus::Success => {
                    snapshot.ci_status = Some(CiStatus::Success);
                    Ok(CiResult::Success)
                }
                CombinedCheckStatus::Failure => {
                    snapshot.ci_status = Some(CiStatus::Failure);
                    if *ci_retry_used {
                        Ok(CiResult::Blocked(WorkerOutcome::Blocked {
                            reason: "CI failed after retries".to_string(),
                        }))
                    } else {
                        *ci_retry_used = true;
                        snapshot.phase = WorkerPhase::FixingCi;
                        self.persist(snapshot);
                        self.codegen.run(
                            &fix_ci_failures_prompt("CI run failed; see PR checks for details"),
                            worktree,
                            self.config.ci_timeout_s,
                            &worktree.join(".pipeline-codegen.log"),
                        )?;
                        if let Some(sha) = self.vcs.commit(worktree, "Fix CI failures")? {
                            snapshot.commits.push(sha);
                        }
                        self.vcs.push(worktree, &snapshot.branch)?;
                        Ok(CiResult::RetryReview)
                    }
                }
                CombinedCheckStatus::Pending => unreachable!("pending is normalized above"),
            };
        }
    }

    fn verify_main(&self, repo: &str, snapshot: &mut WorkerSnapshot) -> Result<MainVerification> {
        let deadline = Instant::now() + Duration::from_secs(self.config.main_build_timeout_s);
        loop {
            // Main-branch verification reuses the same combined-check query
            // against the default branch's HEAD commit via the issue source.
            match self.issue_source.combined_check_status(repo, snapshot.pr_number.unwrap_or(0))? {
                CombinedCheckStatus::Success => return Ok(MainVerification::Verified),
                CombinedCheckStatus::Failure => return Ok(MainVerification::Regressed),
                CombinedCheckStatus::Pending => {
                    if Instant::now() >= deadline {
                        return Ok(MainVerification::TimedOut);
                    }
                    thread::sleep(Duration::from_secs(self.config.main_build_poll_s));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MainVerification {
    Verified,
    Regressed,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_kind_prefers_node_over_python_when_both_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        assert_eq!(detect_manifest_kind(dir.path()), ManifestKind::Node);
    }

    #[test]
    fn manifest_kind_unknown_with_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_manifest_kind(dir.path()), ManifestKind::Unknown);
    }

    #[test]
    fn unknown_manifest_has_no_validation_commands() {
        assert!(validation_commands(ManifestKind::Unknown).is_empty());
    }

    // --- Scenario tests: fake IssueSourceClient/CodegenDriver/VcsDriver drive
    // WorkerRuntime::run through the scripted seeded scenarios below. Every
    // timeout in `test_config` is zero and every scripted response is queued
    // up front, so a scenario never needs to block on a real sleep.

    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use crate::model::{ChangeRequest, Review, ReviewComment, ReviewVerdict};

    struct FakeIssueSource {
        cr_number: u64,
        reviews_by_call: RefCell<VecDeque<Vec<Review>>>,
        ci_by_call: RefCell<VecDeque<CombinedCheckStatus>>,
        mergeable_seq: RefCell<VecDeque<Mergeable>>,
        merge_seq: RefCell<VecDeque<bool>>,
        next_issue_id: Cell<u64>,
        created_issue_titles: RefCell<Vec<String>>,
    }

    impl Default for FakeIssueSource {
        fn default() -> Self {
            Self {
                cr_number: 100,
                reviews_by_call: RefCell::new(VecDeque::new()),
                ci_by_call: RefCell::new(VecDeque::new()),
                mergeable_seq: RefCell::new(VecDeque::new()),
                merge_seq: RefCell::new(VecDeque::new()),
                next_issue_id: Cell::new(9000),
                created_issue_titles: RefCell::new(Vec::new()),
            }
        }
    }

    impl IssueSourceClient for FakeIssueSource {
        fn list_open_issues(&self, _repo: &str) -> Result<Vec<Issue>> {
            Ok(vec![])
        }
        fn get_issue(&self, _repo: &str, _number: u64) -> Result<Issue> {
            unreachable!("WorkerRuntime::run never calls get_issue")
        }
        fn find_open_change_request_for_branch(&self, _repo: &str, _branch: &str) -> Result<Option<ChangeRequest>> {
            Ok(None)
        }
        fn create_change_request(&self, _repo: &str, branch: &str, _title: &str, _body: &str) -> Result<ChangeRequest> {
            Ok(ChangeRequest {
                number: self.cr_number,
                url: format!("https://example.invalid/pr/{}", self.cr_number),
                branch: branch.to_string(),
            })
        }
        fn list_reviews(&self, _repo: &str, _pr_number: u64) -> Result<Vec<Review>> {
            Ok(self.reviews_by_call.borrow_mut().pop_front().unwrap_or_default())
        }
        fn list_issue_comments(&self, _repo: &str, _issue_number: u64) -> Result<Vec<ReviewComment>> {
            Ok(vec![])
        }
        fn combined_check_status(&self, _repo: &str, _pr_number: u64) -> Result<CombinedCheckStatus> {
            Ok(self.ci_by_call.borrow_mut().pop_front().unwrap_or(CombinedCheckStatus::Success))
        }
        fn mergeable(&self, _repo: &str, _pr_number: u64) -> Result<Mergeable> {
            Ok(self.mergeable_seq.borrow_mut().pop_front().unwrap_or(Mergeable::Mergeable))
        }
        fn merge(&self, _repo: &str, _pr_number: u64) -> Result<()> {
            if self.merge_seq.borrow_mut().pop_front().unwrap_or(true) {
                Ok(())
            } else {
                anyhow::bail!("merge rejected")
            }
        }
        fn create_issue(&self, _repo: &str, title: &str, _body: &str, _labels: &[&str]) -> Result<u64> {
            let id = self.next_issue_id.get();
            self.next_issue_id.set(id + 1);
            self.created_issue_titles.borrow_mut().push(title.to_string());
            Ok(id)
        }
        fn transition_label(&self, _repo: &str, _issue_number: u64, _remove: Option<&str>, _add: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    struct FakeCodegen;
    impl CodegenDriver for FakeCodegen {
        fn run(&self, _prompt: &str, _cwd: &std::path::Path, _timeout_s: u64, _log_path: &std::path::Path) -> Result<CodegenOutcome> {
            Ok(CodegenOutcome::Success)
        }
    }

    struct FakeVcs {
        rebase_succeeds: bool,
    }

    impl Default for FakeVcs {
        fn default() -> Self {
            Self { rebase_succeeds: true }
        }
    }

    impl VcsDriver for FakeVcs {
        fn initialize_worktree(&self, _repo_path: &std::path::Path, worktree_path: &std::path::Path, _branch: &str, _base_branch: &str) -> Result<()> {
            std::fs::create_dir_all(worktree_path)?;
            Ok(())
        }
        fn commit(&self, _worktree_path: &std::path::Path, _message: &str) -> Result<Option<String>> {
            Ok(Some("deadbeef".to_string()))
        }
        fn push(&self, _worktree_path: &std::path::Path, _branch: &str) -> Result<()> {
            Ok(())
        }
        fn has_conflicts(&self, _worktree_path: &std::path::Path, _base_branch: &str) -> Result<bool> {
            Ok(false)
        }
        fn rebase_on(&self, _worktree_path: &std::path::Path, _base_branch: &str) -> Result<bool> {
            Ok(self.rebase_succeeds)
        }
        fn changed_files(&self, _worktree_path: &std::path::Path) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn cleanup(&self, _repo_path: &std::path::Path, worktree_path: &std::path::Path) -> Result<()> {
            let _ = std::fs::remove_dir_all(worktree_path);
            Ok(())
        }
    }

    fn scenario_issue() -> Issue {
        Issue::new("owner/repo", 42, "Add widget", "Please add a widget", vec![])
    }

    fn approved_review(id: u64) -> Review {
        Review { id, author: "reviewer".to_string(), verdict: ReviewVerdict::Approved, body: "LGTM".to_string(), comments: vec![] }
    }

    fn changes_requested_review(id: u64, comments: Vec<ReviewComment>) -> Review {
        Review { id, author: "reviewer".to_string(), verdict: ReviewVerdict::ChangesRequested, body: "".to_string(), comments }
    }

    /// Every timeout/poll is zero: a scripted call that supplies a fresh
    /// response resolves immediately, and an empty queue falls through its
    /// deadline check on the very next instant rather than sleeping.
    fn test_config(status_dir: std::path::PathBuf) -> WorkerConfig {
        WorkerConfig {
            review_timeout_s: 0,
            review_poll_s: 0,
            ci_timeout_s: 0,
            ci_poll_s: 0,
            main_build_timeout_s: 0,
            main_build_poll_s: 0,
            max_retries: 3,
            status_dir,
        }
    }

    fn run_scenario(issue_source: &FakeIssueSource, vcs: &FakeVcs, dir: &std::path::Path) -> Result<WorkerOutcome> {
        let codegen = FakeCodegen;
        let config = test_config(dir.join("status"));
        let notifications = NotificationJournal::new(dir.join("notifications.jsonl"));
        let escalations = EscalationSink::new(crate::status_store::EscalationLog::new(dir.join("escalations.jsonl")));
        let runtime = WorkerRuntime::new(
            issue_source,
            &codegen,
            vcs,
            config,
            dir.join("repos"),
            dir.join("worktrees"),
            notifications,
            escalations,
        );
        runtime.run("owner/repo", &scenario_issue())
    }

    #[test]
    fn happy_path_completes_and_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let issue_source = FakeIssueSource::default();
        issue_source.reviews_by_call.borrow_mut().push_back(vec![approved_review(1)]);
        let vcs = FakeVcs::default();

        let outcome = run_scenario(&issue_source, &vcs, dir.path()).unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed { main_branch_verified: true });

        let notifications = NotificationJournal::new(dir.path().join("notifications.jsonl"));
        let all = notifications.read_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].category, NotificationCategory::Completed);

        let escalations = EscalationSink::new(crate::status_store::EscalationLog::new(dir.path().join("escalations.jsonl")));
        assert!(escalations.unresolved().is_empty());
    }

    #[test]
    fn changes_requested_spawns_follow_up_issue_then_completes() {
        let dir = tempfile::tempdir().unwrap();
        let issue_source = FakeIssueSource::default();
        issue_source.reviews_by_call.borrow_mut().push_back(vec![changes_requested_review(
            1,
            vec![
                ReviewComment { id: 1, author: "reviewer".into(), body: "must fix this null deref".into(), path: Some("src/x.rs".into()), line: Some(10) },
                ReviewComment { id: 2, author: "reviewer".into(), body: "nit: rename this variable".into(), path: Some("src/y.rs".into()), line: Some(5) },
            ],
        )]);
        issue_source.reviews_by_call.borrow_mut().push_back(vec![approved_review(2)]);
        let vcs = FakeVcs::default();

        let outcome = run_scenario(&issue_source, &vcs, dir.path()).unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed { main_branch_verified: true });
        assert_eq!(issue_source.created_issue_titles.borrow().len(), 1);

        let store = FileStatusStore::new(dir.path().join("status"));
        let snapshot = store.read_worker(42).unwrap();
        assert_eq!(snapshot.created_issues.len(), 1);
    }

    #[test]
    fn ci_fails_twice_blocks_with_fix_budget_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let issue_source = FakeIssueSource::default();
        issue_source.reviews_by_call.borrow_mut().push_back(vec![approved_review(1)]);
        issue_source.ci_by_call.borrow_mut().push_back(CombinedCheckStatus::Failure);
        issue_source.ci_by_call.borrow_mut().push_back(CombinedCheckStatus::Failure);
        let vcs = FakeVcs::default();

        let outcome = run_scenario(&issue_source, &vcs, dir.path()).unwrap();
        assert_eq!(outcome, WorkerOutcome::Blocked { reason: "CI failed after retries".to_string() });

        let escalations = EscalationSink::new(crate::status_store::EscalationLog::new(dir.path().join("escalations.jsonl")));
        let all = escalations.unresolved();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].category, crate::model::EscalationCategory::Blocked);

        // Blocked preserves the worktree for manual intervention; cleanup must
        // never run on this path.
        assert!(dir.path().join("worktrees").join("issue-42").exists());
    }

    #[test]
    fn merge_conflict_with_failed_rebase_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let issue_source = FakeIssueSource::default();
        issue_source.reviews_by_call.borrow_mut().push_back(vec![approved_review(1)]);
        issue_source.mergeable_seq.borrow_mut().push_back(Mergeable::Conflicting);
        let vcs = FakeVcs { rebase_succeeds: false };

        let outcome = run_scenario(&issue_source, &vcs, dir.path()).unwrap();
        assert_eq!(outcome, WorkerOutcome::Blocked { reason: "Merge conflicts require manual resolution".to_string() });
        assert!(dir.path().join("worktrees").join("issue-42").exists());
    }

    #[test]
    fn post_merge_regression_fails_and_escalates_with_pr_context() {
        let dir = tempfile::tempdir().unwrap();
        let issue_source = FakeIssueSource::default();
        issue_source.reviews_by_call.borrow_mut().push_back(vec![approved_review(1)]);
        issue_source.ci_by_call.borrow_mut().push_back(CombinedCheckStatus::Success);
        issue_source.ci_by_call.borrow_mut().push_back(CombinedCheckStatus::Failure);
        let vcs = FakeVcs::default();

        let outcome = run_scenario(&issue_source, &vcs, dir.path()).unwrap();
        match &outcome {
            WorkerOutcome::Failed { message } => assert!(message.contains("regressed")),
            other => panic!("expected Failed, got {other:?}"),
        }

        let escalations = EscalationSink::new(crate::status_store::EscalationLog::new(dir.path().join("escalations.jsonl")));
        let all = escalations.unresolved();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].category, crate::model::EscalationCategory::PostMergeRegression);
        assert_eq!(all[0].context["pr_number"], 100);
        assert_eq!(all[0].context["issue_number"], 42);
    }
}
