//! Domain model shared by the supervisor and worker binaries.
//!
//! Mirrors the on-disk JSON schemas byte-for-byte so that a `worker-<id>.json`
//! or `animation-worker-<id>.json` file written by one process can be read by
//! any other without a version negotiation step.

use serde::{Deserialize, Serialize};

/// Heuristic difficulty bucket for an issue, used only to bias scheduling —
/// never to gate assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl IssueComplexity {
    /// Derive complexity from labels first, then title keywords, then body
    /// length. Labels win outright; a `"complexity:*"` label is authoritative.
    pub fn estimate(labels: &[String], title: &str, body: &str) -> Self {
        for label in labels {
            match label.to_ascii_lowercase().as_str() {
                "complexity:trivial" | "good-first-issue" => return Self::Trivial,
                "complexity:simple" => return Self::Simple,
                "complexity:moderate" => return Self::Moderate,
                "complexity:complex" | "epic" => return Self::Complex,
                _ => {}
            }
        }

        let title_lower = title.to_ascii_lowercase();
        if title_lower.contains("typo") || title_lower.contains("small fix") {
            return Self::Trivial;
        }
        if title_lower.contains("refactor") || title_lower.contains("redesign") {
            return Self::Complex;
        }

        match body.len() {
            0..=200 => Self::Simple,
            201..=800 => Self::Moderate,
            _ => Self::Complex,
        }
    }
}

/// Admission filter: an issue auto-assigns only if it carries at least one
/// `auto_assign_labels` label and none of `skip_labels`; a skip label always
/// wins even if an auto-assign label is also present.
pub fn should_auto_assign(labels: &[String], auto_assign_labels: &[String], skip_labels: &[String]) -> bool {
    let lower: Vec<String> = labels.iter().map(|l| l.to_ascii_lowercase()).collect();
    if skip_labels.iter().any(|s| lower.contains(&s.to_ascii_lowercase())) {
        return false;
    }
    auto_assign_labels.iter().any(|a| lower.contains(&a.to_ascii_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Assigned,
    InProgress,
    InReview,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub repo: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub status: IssueStatus,
    pub estimated_complexity: IssueComplexity,
}

impl Issue {
    pub fn new(repo: impl Into<String>, number: u64, title: impl Into<String>, body: impl Into<String>, labels: Vec<String>) -> Self {
        let title = title.into();
        let body = body.into();
        let estimated_complexity = IssueComplexity::estimate(&labels, &title, &body);
        Self {
            number,
            repo: repo.into(),
            title,
            body,
            labels,
            status: IssueStatus::Open,
            estimated_complexity,
        }
    }
}

/// The 13-phase worker state machine from the issue-to-merge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Initializing,
    Implementing,
    Validating,
    FixingValidation,
    CreatingCr,
    AwaitingReview,
    AddressingFeedback,
    CheckingCi,
    FixingCi,
    ResolvingConflicts,
    Merging,
    VerifyingMain,
    Completed,
    Failed,
    Blocked,
}

impl WorkerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub level: LogLevel,
    pub message: String,
}

/// The `worker-<issue_number>.json` on-disk record. Field names and
/// optionality match the protocol's on-disk layout exactly; any reader must
/// tolerate unknown extra keys and treat a missing optional key as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub pid: u32,
    pub issue_number: u64,
    pub branch: String,
    pub worktree_path: String,
    pub phase: WorkerPhase,
    pub started_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub commits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_status: Option<ReviewState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_status: Option<CiStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub created_issues: Vec<u64>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub main_branch_verified: bool,
}

/// Per-iteration result recorded by the iterative quality loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationStatus {
    pub iteration_number: u32,
    pub quality_score: f64,
    pub verdict: QualityVerdict,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityVerdict {
    Done,
    NeedsWork,
}

/// The `animation-worker-<issue_number>.json` on-disk record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationSnapshot {
    pub pid: u32,
    pub issue_number: u64,
    pub branch: String,
    pub phase: WorkerPhase,
    pub started_at: String,
    pub updated_at: String,
    pub current_iteration: u32,
    #[serde(default)]
    pub iterations: Vec<IterationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_blend_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_frames_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roblox_export_path: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    StatusUpdate,
    PermissionRequest,
    Blocked,
    Completed,
    Failed,
    PostMergeFailed,
    IterationComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub ts: String,
    pub issue_number: u64,
    pub category: NotificationCategory,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCategory {
    Blocked,
    Failed,
    Timeout,
    PostMergeRegression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub ts: String,
    pub issue_number: u64,
    pub category: EscalationCategory,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub number: u64,
    pub url: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mergeable {
    Mergeable,
    Conflicting,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinedCheckStatus {
    Success,
    Failure,
    Pending,
}

#[derive(Debug, Clone)]
pub struct ReviewComment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    Commented,
}

#[derive(Debug, Clone)]
pub struct Review {
    pub id: u64,
    pub author: String,
    pub verdict: ReviewVerdict,
    pub body: String,
    pub comments: Vec<ReviewComment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_label_wins_over_body_length() {
        let labels = vec!["complexity:trivial".to_string()];
        let huge_body = "x".repeat(5000);
        assert_eq!(
            IssueComplexity::estimate(&labels, "ignored title", &huge_body),
            IssueComplexity::Trivial
        );
    }

    #[test]
    fn complexity_falls_back_to_body_length_buckets() {
        assert_eq!(IssueComplexity::estimate(&[], "t", ""), IssueComplexity::Simple);
        assert_eq!(
            IssueComplexity::estimate(&[], "t", &"x".repeat(500)),
            IssueComplexity::Moderate
        );
        assert_eq!(
            IssueComplexity::estimate(&[], "t", &"x".repeat(2000)),
            IssueComplexity::Complex
        );
    }

    #[test]
    fn complexity_title_keyword_override() {
        assert_eq!(
            IssueComplexity::estimate(&[], "Fix typo in README", ""),
            IssueComplexity::Trivial
        );
        assert_eq!(
            IssueComplexity::estimate(&[], "Refactor the auth module", "short"),
            IssueComplexity::Complex
        );
    }

    #[test]
    fn auto_assign_requires_a_matching_label() {
        let auto = vec!["good-first-issue".to_string(), "bug".to_string()];
        let skip = vec!["wontfix".to_string()];
        assert!(should_auto_assign(&["bug".to_string()], &auto, &skip));
        assert!(!should_auto_assign(&["documentation".to_string()], &auto, &skip));
    }

    #[test]
    fn skip_label_wins_over_auto_assign_label() {
        let auto = vec!["bug".to_string()];
        let skip = vec!["wontfix".to_string()];
        assert!(!should_auto_assign(&["bug".to_string(), "wontfix".to_string()], &auto, &skip));
    }

    #[test]
    fn worker_phase_terminal_states() {
        assert!(WorkerPhase::Completed.is_terminal());
        assert!(WorkerPhase::Failed.is_terminal());
        assert!(WorkerPhase::Blocked.is_terminal());
        assert!(!WorkerPhase::Implementing.is_terminal());
        assert!(!WorkerPhase::AwaitingReview.is_terminal());
    }

    #[test]
    fn worker_snapshot_round_trips_through_json() {
        let snap = WorkerSnapshot {
            pid: 123,
            issue_number: 42,
            branch: "issue-42".to_string(),
            worktree_path: "/tmp/wt-42".to_string(),
            phase: WorkerPhase::AwaitingReview,
            started_at: "2026-07-27T00:00:00Z".to_string(),
            updated_at: "2026-07-27T00:05:00Z".to_string(),
            commits: vec!["abc123".to_string()],
            pr_number: Some(7),
            pr_url: Some("https://example.invalid/pr/7".to_string()),
            review_status: Some(ReviewState::Pending),
            ci_status: None,
            blocked_reason: None,
            created_issues: vec![],
            logs: vec![],
            main_branch_verified: false,
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: WorkerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.issue_number, 42);
        assert_eq!(back.phase, WorkerPhase::AwaitingReview);
        assert_eq!(back.pr_number, Some(7));
    }

    #[test]
    fn worker_snapshot_tolerates_missing_optional_fields() {
        let minimal = r#"{
            "pid": 1, "issue_number": 2, "branch": "b", "worktree_path": "/tmp/b",
            "phase": "initializing", "started_at": "t0", "updated_at": "t1"
        }"#;
        let snap: WorkerSnapshot = serde_json::from_str(minimal).unwrap();
        assert!(snap.pr_number.is_none());
        assert!(snap.commits.is_empty());
        assert!(!snap.main_branch_verified);
    }
}
