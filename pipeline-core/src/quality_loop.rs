//! Generic iterative produce/render/evaluate loop, used by the animation
//! worker variant. The driver has no domain knowledge of what it is
//! producing or rendering — only the evaluator's verdict, which it never
//! trusts blindly.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use crate::model::{AnimationSnapshot, IterationStatus, Notification, NotificationCategory, QualityVerdict, WorkerPhase};
use crate::status_store::{FileStatusStore, NotificationJournal};

pub trait ArtifactProducer {
    /// Produce (or revise) the artifact for this iteration, given feedback
    /// from the previous one (empty on the first iteration).
    fn produce(&self, iteration: u32, prior_suggestions: &[String]) -> Result<String>;
}

pub trait ArtifactRenderer {
    /// Render the artifact at `artifact_path` to an inspectable output and
    /// return its path.
    fn render(&self, artifact_path: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: QualityVerdict,
    pub score: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

pub trait QualityEvaluator {
    fn evaluate(&self, rendered_path: &str) -> Result<Evaluation>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Done { final_score: f64, artifact_path: String },
    NeedsWork { final_score: f64, iterations_used: u32 },
}

pub struct IterativeQualityLoop<'a, P, R, E> {
    producer: &'a P,
    renderer: &'a R,
    evaluator: &'a E,
    status_store: FileStatusStore,
    notifications: NotificationJournal,
    max_iterations: u32,
    quality_threshold: f64,
}

impl<'a, P, R, E> IterativeQualityLoop<'a, P, R, E>
where
    P: ArtifactProducer,
    R: ArtifactRenderer,
    E: QualityEvaluator,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        producer: &'a P,
        renderer: &'a R,
        evaluator: &'a E,
        status_dir: std::path::PathBuf,
        notifications: NotificationJournal,
        max_iterations: u32,
        quality_threshold: f64,
    ) -> Self {
        Self {
            producer,
            renderer,
            evaluator,
            status_store: FileStatusStore::new(status_dir),
            notifications,
            max_iterations,
            quality_threshold,
        }
    }

    pub fn run(&self, mut snapshot: AnimationSnapshot) -> Result<LoopOutcome> {
        let mut suggestions: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            snapshot.current_iteration = iteration;

            // Produce/render are allowed to fail per iteration (a flaky
            // renderer, a transient codegen error); record it and move on to
            // the next iteration rather than aborting the whole run.
            let artifact_path = match self.producer.produce(iteration, &suggestions) {
                Ok(path) => path,
                Err(e) => {
                    snapshot.iterations.push(IterationStatus {
                        iteration_number: iteration,
                        quality_score: 0.0,
                        verdict: QualityVerdict::NeedsWork,
                        issues: vec![format!("produce failed: {e}")],
                        suggestions: vec![],
                        artifact_path: None,
                    });
                    let _ = self.status_store.write_animation(&snapshot);
                    continue;
                }
            };
            let rendered_path = match self.renderer.render(&artifact_path) {
                Ok(path) => path,
                Err(e) => {
                    snapshot.iterations.push(IterationStatus {
                        iteration_number: iteration,
                        quality_score: 0.0,
                        verdict: QualityVerdict::NeedsWork,
                        issues: vec![format!("render failed: {e}")],
                        suggestions: vec![],
                        artifact_path: Some(artifact_path),
                    });
                    let _ = self.status_store.write_animation(&snapshot);
                    continue;
                }
            };
            let mut evaluation = self.evaluator.evaluate(&rendered_path)?;

            // The evaluator's verdict is authoritative except for this one
            // coercion: a `done` verdict below threshold is never trusted at
            // face value, since a miscalibrated evaluator would otherwise
            // end the loop on a low-quality artifact.
            if evaluation.verdict == QualityVerdict::Done && evaluation.score < self.quality_threshold {
                evaluation.verdict = QualityVerdict::NeedsWork;
            }

            snapshot.iterations.push(IterationStatus {
                iteration_number: iteration,
                quality_score: evaluation.score,
                verdict: evaluation.verdict,
                issues: evaluation.issues.clone(),
                suggestions: evaluation.suggestions.clone(),
                artifact_path: Some(rendered_path.clone()),
            });
            // Every iteration's verdict is persisted before the next
            // iteration starts, so a crash mid-loop never loses a result.
            let _ = self.status_store.write_animation(&snapshot);

            if evaluation.verdict == QualityVerdict::Done {
                snapshot.phase = WorkerPhase::Completed;
                snapshot.final_quality_score = Some(evaluation.score);
                let _ = self.status_store.write_animation(&snapshot);
                let notification = Notification {
                    ts: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    issue_number: snapshot.issue_number,
                    category: NotificationCategory::Completed,
                    message: "Animation converged on a passing quality score".to_string(),
                    metadata: json!({"iterations": iteration, "quality_score": evaluation.score}),
                };
                let _ = self.notifications.append(&notification);
                return Ok(LoopOutcome::Done { final_score: evaluation.score, artifact_path: rendered_path });
            }

            suggestions = evaluation.suggestions;
        }

        let final_score = snapshot.iterations.last().map(|i| i.quality_score).unwrap_or(0.0);
        snapshot.phase = WorkerPhase::Failed;
        let _ = self.status_store.write_animation(&snapshot);
        let notification = Notification {
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            issue_number: snapshot.issue_number,
            category: NotificationCategory::Failed,
            message: format!(
                "Animation failed after {} iterations without meeting quality threshold ({})",
                self.max_iterations, self.quality_threshold
            ),
            metadata: json!({"requires_response": true}),
        };
        let _ = self.notifications.append(&notification);
        Ok(LoopOutcome::NeedsWork { final_score, iterations_used: self.max_iterations })
    }
}
