//! Human-facing escalation sink: a closed set of categories, each appended to
//! the escalation journal and printed to stderr for whoever is watching the
//! console.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use crate::model::{Escalation, EscalationCategory};
use crate::status_store::EscalationLog;

pub struct EscalationSink {
    log: EscalationLog,
}

impl EscalationSink {
    pub fn new(log: EscalationLog) -> Self {
        Self { log }
    }

    fn now() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    fn raise(&self, category: EscalationCategory, issue_number: u64, message: String, context: serde_json::Value) -> Result<()> {
        let escalation = Escalation { ts: Self::now(), issue_number, category, message: message.clone(), context };
        self.log.append(&escalation)?;
        self.notify(&escalation);
        Ok(())
    }

    pub fn escalate_blocked(&self, issue_number: u64, reason: &str) -> Result<()> {
        self.raise(
            EscalationCategory::Blocked,
            issue_number,
            format!("Worker blocked: {reason}"),
            json!({"reason": reason}),
        )
    }

    pub fn escalate_failed(&self, issue_number: u64, message: &str) -> Result<()> {
        self.raise(
            EscalationCategory::Failed,
            issue_number,
            format!("Worker failed: {message}"),
            json!({"message": message}),
        )
    }

    pub fn escalate_timeout(&self, issue_number: u64, started_at: &str) -> Result<()> {
        self.raise(
            EscalationCategory::Timeout,
            issue_number,
            format!("Worker exceeded its timeout (started {started_at})"),
            json!({"started_at": started_at}),
        )
    }

    pub fn escalate_post_merge_regression(&self, issue_number: u64, pr_number: u64) -> Result<()> {
        self.raise(
            EscalationCategory::PostMergeRegression,
            issue_number,
            format!("Main branch build regressed after merging PR #{pr_number}"),
            json!({"pr_number": pr_number, "issue_number": issue_number}),
        )
    }

    fn notify(&self, escalation: &Escalation) {
        eprintln!("{}", "=".repeat(60));
        eprintln!(
            "ESCALATION [{:?}] issue #{}: {}",
            escalation.category, escalation.issue_number, escalation.message
        );
        eprintln!("{}", "=".repeat(60));
    }

    pub fn unresolved(&self) -> Vec<Escalation> {
        self.log.read_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn escalate_blocked_appends_to_journal() {
        let dir = tempdir().unwrap();
        let sink = EscalationSink::new(EscalationLog::new(dir.path().join("escalations.jsonl")));
        sink.escalate_blocked(1, "merge conflicts").unwrap();
        let all = sink.unresolved();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].category, EscalationCategory::Blocked);
    }

    #[test]
    fn each_category_constructor_uses_its_own_category() {
        let dir = tempdir().unwrap();
        let sink = EscalationSink::new(EscalationLog::new(dir.path().join("escalations.jsonl")));
        sink.escalate_blocked(1, "r").unwrap();
        sink.escalate_failed(2, "m").unwrap();
        sink.escalate_timeout(3, "2026-07-27T00:00:00Z").unwrap();
        sink.escalate_post_merge_regression(4, 99).unwrap();
        let categories: Vec<_> = sink.unresolved().into_iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![
                EscalationCategory::Blocked,
                EscalationCategory::Failed,
                EscalationCategory::Timeout,
                EscalationCategory::PostMergeRegression,
            ]
        );
    }
}
