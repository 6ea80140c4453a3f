//! Evaluation pipeline.
//!
//! - **SubmissionOrchestrator**: one submission; fetches the repository once,
//!   runs every configured agent as an independent task, verifies evidence,
//!   records cost and resolves status and score
//! - **BatchOrchestrator**: many submissions under a concurrency limit, each
//!   in its own failure domain, ranked into a leaderboard
//! - **EvaluationConfig**: budgets, timeouts and model selection
//!
//! # Example
//!
//! ```rust,ignore
//! use hack_judge::pipeline::{BatchOrchestrator, EvaluationConfig, Submission, SubmissionOrchestrator};
//! use std::sync::Arc;
//!
//! let config = EvaluationConfig::from_env()?.with_max_concurrent_submissions(8);
//! let orchestrator = SubmissionOrchestrator::new(context, runner, costs, rubric, config);
//! let batch = BatchOrchestrator::new(Arc::new(orchestrator));
//!
//! let report = batch
//!     .run(vec![Submission::new("team-7", "https://github.com/team-7/app")])
//!     .await;
//! println!("{} completed, {} failed", report.summary.completed, report.summary.failed);
//! ```
//!
//! # Status
//!
//! A submission is COMPLETED when every configured agent succeeded, PARTIAL
//! when at least one did, FAILED otherwise or when its repository could not
//! be fetched. Only RepoUnavailable and a submission with no successful agent
//! are FAILED; cost write failures never change status or score.

pub mod batch;
pub mod config;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchOrchestrator, BatchReport, BatchSummary};
pub use config::{ConfigError, EvaluationConfig};
pub use orchestrator::{
    AgentOutcome, CostStatus, Submission, SubmissionOrchestrator, SubmissionResult,
    SubmissionStatus,
};
