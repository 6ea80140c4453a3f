//! Batch orchestrator: many submissions, independent failure domains.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::orchestrator::{Submission, SubmissionOrchestrator, SubmissionResult, SubmissionStatus};
use crate::metrics::MetricsCollector;
use crate::scoring::{leaderboard, LeaderboardEntry, RankCandidate};

/// Status counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    pub total: usize,
}

impl BatchSummary {
    fn count(&mut self, status: SubmissionStatus) {
        self.total += 1;
        match status {
            SubmissionStatus::Completed => self.completed += 1,
            SubmissionStatus::Partial => self.partial += 1,
            SubmissionStatus::Failed => self.failed += 1,
        }
    }
}

/// Everything a batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub summary: BatchSummary,
    /// One result per submission, in input order.
    pub results: Vec<SubmissionResult>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl BatchReport {
    fn new(batch_id: Uuid, results: Vec<SubmissionResult>) -> Self {
        let mut summary = BatchSummary::default();
        for result in &results {
            summary.count(result.status);
        }
        let leaderboard = leaderboard(results.iter().map(|r| RankCandidate {
            submission_id: r.submission_id.clone(),
            submitted_at: r.submitted_at,
            score: r.total_score(),
        }));
        Self {
            batch_id,
            summary,
            results,
            leaderboard,
        }
    }
}

/// Runs submissions concurrently, at most `max_concurrent_submissions` at once.
pub struct BatchOrchestrator {
    orchestrator: Arc<SubmissionOrchestrator>,
    limiter: Arc<Semaphore>,
}

impl BatchOrchestrator {
    pub fn new(orchestrator: Arc<SubmissionOrchestrator>) -> Self {
        let permits = orchestrator.config().max_concurrent_submissions.max(1);
        Self {
            orchestrator,
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Evaluate every submission and rank the results.
    #[instrument(skip_all, fields(submissions = submissions.len()))]
    pub async fn run(&self, submissions: Vec<Submission>) -> BatchReport {
        let batch_id = Uuid::new_v4();
        info!(%batch_id, "Starting batch");

        let mut tasks = JoinSet::new();
        for (idx, submission) in submissions.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let limiter = Arc::clone(&self.limiter);
            tasks.spawn(async move {
                // The semaphore is never closed; a closed one only lifts the bound.
                let _permit = limiter.acquire_owned().await.ok();
                let started_at = Utc::now();
                let clock = std::time::Instant::now();
                let result = match AssertUnwindSafe(orchestrator.evaluate(&submission))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        error!(submission_id = %submission.id, "Submission evaluation panicked");
                        let result =
                            SubmissionResult::failed(&submission, started_at, "evaluation panicked");
                        MetricsCollector::new().submission_finished(
                            result.status.as_str(),
                            clock.elapsed().as_secs_f64(),
                        );
                        result
                    }
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<SubmissionResult>> = vec![None; submissions.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(err) => error!(error = %err, "Submission task ended without a result"),
            }
        }

        let results: Vec<SubmissionResult> = slots
            .into_iter()
            .zip(&submissions)
            .map(|(slot, submission)| {
                slot.unwrap_or_else(|| {
                    SubmissionResult::failed(submission, Utc::now(), "evaluation task was lost")
                })
            })
            .collect();

        let report = BatchReport::new(batch_id, results);
        info!(
            %batch_id,
            completed = report.summary.completed,
            partial = report.summary.partial,
            failed = report.summary.failed,
            "Batch finished"
        );
        report
    }
}
