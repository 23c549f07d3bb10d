//! Bot-review synthesis: lift bot-authored issue comments into synthetic PR
//! reviews, and extract `[path:line]`/`[path:line-range]` references.
//!
//! Deliberately conservative — both keyword lists below are closed sets
//! taken from the review-comment heuristics that motivated this module; do
//! not widen them without widening the scenario tests that pin this
//! behavior.

use std::collections::HashSet;

use regex::Regex;

use crate::model::{Review, ReviewComment, ReviewVerdict};

const CHANGES_REQUESTED_KEYWORDS: &[&str] = &[
    "must", "should", "need to", "fix:", "bug:", "error:", "problem:", "issue:",
];

const BLOCKING_REVIEW_KEYWORDS: &[&str] = &["must", "required", "blocking", "security"];

/// True when `login`/`author_type` identifies a bot review/comment author
/// worth synthesizing into the formal review stream.
pub fn is_bot_author(login: &str, author_type: &str) -> bool {
    author_type == "Bot"
        || login.to_ascii_lowercase().contains("claude")
        || login.to_ascii_lowercase().contains("anthropic")
}

fn contains_changes_requested_keyword(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CHANGES_REQUESTED_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Does this *formal* review comment's body read as blocking, independent of
/// who wrote it? Used to flag human reviews as blocking even without the
/// `CHANGES_REQUESTED` state GitHub itself assigns.
pub fn is_blocking_comment(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    BLOCKING_REVIEW_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn location_regex() -> Regex {
    Regex::new(r"\[([^\[\]]+?)\]").expect("static regex is valid")
}

/// Extract a `(path, line)` pair from a `[path:line]` or `[path:line-range]`
/// reference in a comment body. A range takes its first number.
pub fn extract_location(body: &str) -> Option<(String, u64)> {
    let re = location_regex();
    let caps = re.captures(body)?;
    let inner = caps.get(1)?.as_str();
    let (path, line_part) = inner.rsplit_once(':')?;
    let first = line_part.split('-').next()?;
    let line: u64 = first.parse().ok()?;
    Some((path.to_string(), line))
}

/// Turn a bot-authored issue comment into a synthetic review, applying the
/// `CHANGES_REQUESTED` keyword heuristic. Non-bot comments return `None`.
pub fn synthesize_review_from_comment(comment: &ReviewComment, author_type: &str) -> Option<Review> {
    if !is_bot_author(&comment.author, author_type) {
        return None;
    }
    let verdict = if contains_changes_requested_keyword(&comment.body) {
        ReviewVerdict::ChangesRequested
    } else {
        ReviewVerdict::Commented
    };
    let (path, line) = extract_location(&comment.body)
        .map(|(p, l)| (Some(p), Some(l)))
        .unwrap_or((None, None));

    Some(Review {
        id: comment.id,
        author: comment.author.clone(),
        verdict,
        body: comment.body.clone(),
        comments: vec![ReviewComment {
            id: comment.id,
            author: comment.author.clone(),
            body: comment.body.clone(),
            path,
            line,
        }],
    })
}

/// Track already-processed review/comment ids across polls so re-processing
/// the same feedback is a no-op.
#[derive(Default)]
pub struct FeedbackCursor {
    seen: HashSet<u64>,
}

impl FeedbackCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `reviews` down to ones not yet seen, marking them seen.
    pub fn take_new<'a>(&mut self, reviews: &'a [Review]) -> Vec<&'a Review> {
        let mut fresh = Vec::new();
        for review in reviews {
            if self.seen.insert(review.id) {
                fresh.push(review);
            }
        }
        fresh
    }
}

/// Does the given set of reviews currently block merge? True if any review's
/// verdict is `ChangesRequested`.
pub fn blocks_merge(reviews: &[Review]) -> bool {
    reviews.iter().any(|r| r.verdict == ReviewVerdict::ChangesRequested)
}

/// Split every comment across `reviews` into blocking and non-blocking,
/// per-comment rather than per-review — a `CHANGES_REQUESTED` review can
/// still carry a mix of a blocking defect and a non-blocking nit.
pub fn partition_comments(reviews: &[&Review]) -> (Vec<ReviewComment>, Vec<ReviewComment>) {
    let mut blocking = Vec::new();
    let mut non_blocking = Vec::new();
    for review in reviews {
        for comment in &review.comments {
            if is_blocking_comment(&comment.body) {
                blocking.push(comment.clone());
            } else {
                non_blocking.push(comment.clone());
            }
        }
    }
    (blocking, non_blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: u64, author: &str, body: &str) -> ReviewComment {
        ReviewComment { id, author: author.to_string(), body: body.to_string(), path: None, line: None }
    }

    #[test]
    fn bot_detection_matches_type_and_login_substrings() {
        assert!(is_bot_author("anything", "Bot"));
        assert!(is_bot_author("claude-review-bot", "User"));
        assert!(is_bot_author("AnthropicReviewer", "User"));
        assert!(!is_bot_author("alice", "User"));
    }

    #[test]
    fn non_bot_comment_is_not_synthesized() {
        let c = comment(1, "alice", "must fix this");
        assert!(synthesize_review_from_comment(&c, "User").is_none());
    }

    #[test]
    fn bot_comment_with_keyword_becomes_changes_requested() {
        let c = comment(1, "claude-bot", "fix: this will panic on empty input");
        let review = synthesize_review_from_comment(&c, "User").unwrap();
        assert_eq!(review.verdict, ReviewVerdict::ChangesRequested);
    }

    #[test]
    fn bot_comment_without_keyword_is_commented() {
        let c = comment(1, "claude-bot", "looks fine overall, nice work");
        let review = synthesize_review_from_comment(&c, "User").unwrap();
        assert_eq!(review.verdict, ReviewVerdict::Commented);
    }

    #[test]
    fn extracts_single_line_location() {
        let loc = extract_location("There is a bug [src/lib.rs:42] in this function");
        assert_eq!(loc, Some(("src/lib.rs".to_string(), 42)));
    }

    #[test]
    fn extracts_first_line_of_range() {
        let loc = extract_location("Needs work [src/lib.rs:101-113]");
        assert_eq!(loc, Some(("src/lib.rs".to_string(), 101)));
    }

    #[test]
    fn no_location_returns_none() {
        assert_eq!(extract_location("no location reference here"), None);
    }

    #[test]
    fn blocking_keyword_detection() {
        assert!(is_blocking_comment("This is a security issue"));
        assert!(is_blocking_comment("This change is required before merge"));
        assert!(!is_blocking_comment("nice work, ship it"));
    }

    #[test]
    fn feedback_cursor_dedupes_across_polls() {
        let mut cursor = FeedbackCursor::new();
        let reviews = vec![
            Review { id: 1, author: "a".into(), verdict: ReviewVerdict::Commented, body: "".into(), comments: vec![] },
            Review { id: 2, author: "b".into(), verdict: ReviewVerdict::Commented, body: "".into(), comments: vec![] },
        ];
        assert_eq!(cursor.take_new(&reviews).len(), 2);
        assert_eq!(cursor.take_new(&reviews).len(), 0);
    }

    #[test]
    fn partition_comments_splits_by_blocking_keyword() {
        let review = Review {
            id: 1,
            author: "reviewer".into(),
            verdict: ReviewVerdict::ChangesRequested,
            body: "".into(),
            comments: vec![
                ReviewComment { id: 1, author: "r".into(), body: "must fix null deref".into(), path: Some("src/x.py".into()), line: Some(10) },
                ReviewComment { id: 2, author: "r".into(), body: "nit: rename var".into(), path: Some("src/y.py".into()), line: Some(5) },
            ],
        };
        let (blocking, non_blocking) = partition_comments(&[&review]);
        assert_eq!(blocking.len(), 1);
        assert_eq!(non_blocking.len(), 1);
        assert_eq!(blocking[0].path.as_deref(), Some("src/x.py"));
    }

    #[test]
    fn blocks_merge_true_only_with_changes_requested() {
        let approved = Review { id: 1, author: "a".into(), verdict: ReviewVerdict::Approved, body: "".into(), comments: vec![] };
        let blocking = Review { id: 2, author: "b".into(), verdict: ReviewVerdict::ChangesRequested, body: "".into(), comments: vec![] };
        assert!(!blocks_merge(std::slice::from_ref(&approved)));
        assert!(blocks_merge(&[approved, blocking]));
    }
}
