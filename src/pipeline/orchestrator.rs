//! Submission orchestrator.
//!
//! Evaluates one submission: fetches the repository snapshot once, runs every
//! configured agent as its own task, verifies evidence, records cost, and
//! resolves the submission status and score from whatever finished before the
//! submission timeout.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::config::EvaluationConfig;
use crate::agents::{
    default_system_prompt, AgentError, AgentIdentity, AgentRequest, AgentResponse, AgentRunner,
};
use crate::context::{ContextProvider, RepoData};
use crate::llm::cost::{CostError, CostTracker};
use crate::llm::TokenUsage;
use crate::metrics::MetricsCollector;
use crate::scoring::{aggregate, AgentRubric, RubricWeights, ScoreBreakdown};
use crate::validation::validate_evidence;

/// One repository to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub repo_url: String,
    /// CI run to summarize, if any.
    #[serde(default)]
    pub ci_ref: Option<String>,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(id: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repo_url: repo_url.into(),
            ci_ref: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_ci_ref(mut self, ci_ref: impl Into<String>) -> Self {
        self.ci_ref = Some(ci_ref.into());
        self
    }

    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }
}

/// Final status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    /// Every configured agent succeeded.
    Completed,
    /// At least one agent succeeded and at least one did not.
    Partial,
    /// No agent succeeded, or the repository was unavailable.
    Failed,
}

impl SubmissionStatus {
    /// Status for `succeeded` successes out of `configured` agents.
    pub fn resolve(configured: usize, succeeded: usize) -> Self {
        if succeeded == 0 {
            SubmissionStatus::Failed
        } else if succeeded >= configured {
            SubmissionStatus::Completed
        } else {
            SubmissionStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Completed => "COMPLETED",
            SubmissionStatus::Partial => "PARTIAL",
            SubmissionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a successful agent's usage made it into the cost store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CostStatus {
    Recorded { total_cost_usd: Decimal },
    Failed { reason: String },
}

/// How one agent ended for one submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success {
        model_id: String,
        attempts: u32,
        provider_calls: u32,
        usage: TokenUsage,
        /// Response with verified evidence.
        response: AgentResponse,
        evidence_verified: usize,
        evidence_total: usize,
        cost: CostStatus,
    },
    SchemaFailed {
        model_id: String,
        attempts: u32,
        issues: Vec<String>,
        usage: TokenUsage,
    },
    ProviderError {
        model_id: String,
        throttled: bool,
        message: String,
    },
    TimedOut,
}

impl AgentOutcome {
    /// Outcome label used in metrics and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentOutcome::Success { .. } => "success",
            AgentOutcome::SchemaFailed { .. } => "schema_failed",
            AgentOutcome::ProviderError { .. } => "provider_error",
            AgentOutcome::TimedOut => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Success { .. })
    }

    /// Category scores of a successful run.
    pub fn scores(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            AgentOutcome::Success { response, .. } => Some(response.scores()),
            _ => None,
        }
    }

    /// Why this agent has no score or no cost record, if it has either gap.
    fn diagnostic(&self, agent: AgentIdentity) -> Option<String> {
        match self {
            AgentOutcome::Success {
                cost: CostStatus::Failed { reason },
                ..
            } => Some(format!("{}: cost not recorded: {}", agent, reason)),
            AgentOutcome::Success { .. } => None,
            AgentOutcome::SchemaFailed {
                attempts, issues, ..
            } => Some(format!(
                "{}: schema validation failed after {} attempts: {}",
                agent,
                attempts,
                issues.join("; ")
            )),
            AgentOutcome::ProviderError {
                throttled: true,
                message,
                ..
            } => Some(format!("{}: provider throttled: {}", agent, message)),
            AgentOutcome::ProviderError { message, .. } => {
                Some(format!("{}: provider error: {}", agent, message))
            }
            AgentOutcome::TimedOut => Some(format!("{}: timed out", agent)),
        }
    }
}

/// Everything known about one evaluated submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub submission_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub outcomes: BTreeMap<AgentIdentity, AgentOutcome>,
    /// Weighted score over successful agents; absent when the submission failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreBreakdown>,
    pub diagnostics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SubmissionResult {
    /// A submission that failed before any agent produced an outcome.
    pub fn failed(
        submission: &Submission,
        started_at: DateTime<Utc>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            submission_id: submission.id.clone(),
            submitted_at: submission.submitted_at,
            status: SubmissionStatus::Failed,
            outcomes: BTreeMap::new(),
            score: None,
            diagnostics: vec![diagnostic.into()],
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Final weighted score, if any.
    pub fn total_score(&self) -> Option<f64> {
        self.score.as_ref().map(|s| s.total)
    }

    /// Number of agents that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }
}

/// Evaluates submissions one at a time.
///
/// Holds the shared, read-only collaborators; per-submission state lives in
/// [`SubmissionOrchestrator::evaluate`] and its agent tasks.
pub struct SubmissionOrchestrator {
    context: Arc<dyn ContextProvider>,
    runner: Arc<AgentRunner>,
    costs: Arc<CostTracker>,
    rubric: Arc<RubricWeights>,
    config: Arc<EvaluationConfig>,
    system_prompts: BTreeMap<AgentIdentity, Arc<str>>,
    metrics: MetricsCollector,
}

impl SubmissionOrchestrator {
    pub fn new(
        context: Arc<dyn ContextProvider>,
        runner: Arc<AgentRunner>,
        costs: Arc<CostTracker>,
        rubric: Arc<RubricWeights>,
        config: EvaluationConfig,
    ) -> Self {
        let system_prompts = AgentIdentity::ALL
            .into_iter()
            .map(|identity| (identity, Arc::from(default_system_prompt(identity))))
            .collect();
        Self {
            context,
            runner,
            costs,
            rubric,
            config: Arc::new(config),
            system_prompts,
            metrics: MetricsCollector::new(),
        }
    }

    /// Replace the system prompt of one agent.
    pub fn with_system_prompt(mut self, identity: AgentIdentity, prompt: impl Into<String>) -> Self {
        self.system_prompts
            .insert(identity, Arc::from(prompt.into()));
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn cost_tracker(&self) -> &CostTracker {
        &self.costs
    }

    /// Evaluate one submission.
    ///
    /// Never fails: every problem ends up in the result's status, outcomes and
    /// diagnostics.
    #[instrument(skip_all, fields(submission_id = %submission.id))]
    pub async fn evaluate(&self, submission: &Submission) -> SubmissionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.submission_timeout;
        let _in_progress = self.metrics.submission_started();

        let fetched = tokio::time::timeout_at(
            deadline,
            self.context
                .fetch(&submission.repo_url, submission.ci_ref.as_deref()),
        )
        .await;

        let result = match fetched {
            Ok(Ok(repo)) => {
                self.run_agents(submission, Arc::new(repo), deadline, started_at)
                    .await
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Repository unavailable, no agents run");
                SubmissionResult::failed(submission, started_at, err.to_string())
            }
            Err(_) => {
                warn!("Repository fetch exceeded the submission timeout");
                SubmissionResult::failed(
                    submission,
                    started_at,
                    format!(
                        "Repository '{}' unavailable: fetch timed out after {}s",
                        submission.repo_url,
                        self.config.submission_timeout.as_secs()
                    ),
                )
            }
        };

        self.metrics
            .submission_finished(result.status.as_str(), clock.elapsed().as_secs_f64());
        info!(
            status = %result.status,
            succeeded = result.succeeded(),
            configured = self.config.agents.len(),
            score = ?result.total_score(),
            "Submission evaluated"
        );
        result
    }

    async fn run_agents(
        &self,
        submission: &Submission,
        repo: Arc<RepoData>,
        deadline: tokio::time::Instant,
        started_at: DateTime<Utc>,
    ) -> SubmissionResult {
        let mut tasks = JoinSet::new();
        for &identity in &self.config.agents {
            let task = AgentTask {
                identity,
                submission_id: submission.id.clone(),
                model_id: self.config.model_for(identity).to_string(),
                system_prompt: self.system_prompt(identity),
                rubric: self
                    .rubric
                    .agent(identity)
                    .cloned()
                    .unwrap_or_else(|| AgentRubric::uniform(identity, 0.0)),
                max_retries: self.config.max_retries,
                repo: Arc::clone(&repo),
                runner: Arc::clone(&self.runner),
                metrics: self.metrics.clone(),
            };
            tasks.spawn(task.run_isolated());
        }

        let mut outcomes = BTreeMap::new();
        let mut billable = Vec::new();
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((identity, finish)))) => {
                    finish.sort_into(identity, &mut outcomes, &mut billable);
                }
                Ok(Some(Err(err))) => {
                    error!(error = %err, "Agent task ended without an outcome");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        if timed_out {
            // Keep anything that finished between the deadline and the abort.
            while let Some(joined) = tasks.join_next().await {
                if let Ok((identity, finish)) = joined {
                    finish.sort_into(identity, &mut outcomes, &mut billable);
                }
            }
        }

        // Validated runs are billed outside the aborted set so a slow store
        // cannot cost an agent its result.
        let billed = futures::future::join_all(
            billable
                .into_iter()
                .map(|(identity, run)| self.bill(&submission.id, identity, run)),
        )
        .await;
        outcomes.extend(billed);

        let mut diagnostics = Vec::new();
        if timed_out {
            let unfinished = self
                .config
                .agents
                .iter()
                .filter(|agent| !outcomes.contains_key(*agent))
                .count();
            warn!(unfinished, "Submission timed out, outstanding agents aborted");
            diagnostics.push(format!(
                "submission timed out after {}s with {} agent(s) unfinished",
                self.config.submission_timeout.as_secs(),
                unfinished
            ));
        }

        for &identity in &self.config.agents {
            outcomes.entry(identity).or_insert_with(|| {
                if timed_out {
                    self.metrics
                        .record_agent_outcome(identity.name(), "timed_out", None);
                    AgentOutcome::TimedOut
                } else {
                    AgentOutcome::ProviderError {
                        model_id: self.config.model_for(identity).to_string(),
                        throttled: false,
                        message: "agent task ended without an outcome".to_string(),
                    }
                }
            });
        }

        diagnostics.extend(
            outcomes
                .iter()
                .filter_map(|(identity, outcome)| outcome.diagnostic(*identity)),
        );

        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let status = SubmissionStatus::resolve(self.config.agents.len(), succeeded);
        let score = match status {
            SubmissionStatus::Failed => None,
            _ => aggregate(
                outcomes
                    .iter()
                    .filter_map(|(identity, outcome)| outcome.scores().map(|s| (*identity, s))),
                &self.rubric,
            ),
        };

        SubmissionResult {
            submission_id: submission.id.clone(),
            submitted_at: submission.submitted_at,
            status,
            outcomes,
            score,
            diagnostics,
            started_at,
            finished_at: Utc::now(),
        }
    }

    #[instrument(skip_all, fields(submission_id = %submission_id, agent = %identity, model = %run.model_id))]
    async fn bill(
        &self,
        submission_id: &str,
        identity: AgentIdentity,
        run: ValidatedRun,
    ) -> (AgentIdentity, AgentOutcome) {
        let cost = match self
            .costs
            .record(submission_id, identity, &run.model_id, run.usage)
            .await
        {
            Ok(record) => {
                self.metrics.record_cost(&run.model_id, record.total_cost_usd);
                CostStatus::Recorded {
                    total_cost_usd: record.total_cost_usd,
                }
            }
            Err(err) => {
                let (reason, unrecorded) = match &err {
                    CostError::PersistenceFailed { record, .. } => {
                        ("persistence_failed", Some(record.total_cost_usd))
                    }
                    CostError::UnpricedModel { .. } => ("unpriced_model", None),
                };
                warn!(
                    input_tokens = run.usage.input_tokens,
                    output_tokens = run.usage.output_tokens,
                    cost_usd = ?unrecorded,
                    reason,
                    error = %err,
                    "Cost not recorded; outcome kept"
                );
                self.metrics.record_cost_failure(identity.name(), reason);
                CostStatus::Failed {
                    reason: match unrecorded {
                        Some(cost_usd) => {
                            format!("{} ({} USD unrecorded)", err, cost_usd.normalize())
                        }
                        None => err.to_string(),
                    },
                }
            }
        };

        self.metrics
            .record_agent_outcome(identity.name(), "success", Some(run.attempts));
        (identity, run.into_outcome(cost))
    }

    fn system_prompt(&self, identity: AgentIdentity) -> Arc<str> {
        self.system_prompts
            .get(&identity)
            .cloned()
            .unwrap_or_else(|| Arc::from(default_system_prompt(identity)))
    }
}

/// One agent's work for one submission, owned by its task.
struct AgentTask {
    identity: AgentIdentity,
    submission_id: String,
    model_id: String,
    system_prompt: Arc<str>,
    rubric: AgentRubric,
    max_retries: u32,
    repo: Arc<RepoData>,
    runner: Arc<AgentRunner>,
    metrics: MetricsCollector,
}

/// A run whose response passed validation, waiting for its cost record.
struct ValidatedRun {
    model_id: String,
    attempts: u32,
    provider_calls: u32,
    usage: TokenUsage,
    response: AgentResponse,
    evidence_verified: usize,
    evidence_total: usize,
}

impl ValidatedRun {
    fn into_outcome(self, cost: CostStatus) -> AgentOutcome {
        AgentOutcome::Success {
            model_id: self.model_id,
            attempts: self.attempts,
            provider_calls: self.provider_calls,
            usage: self.usage,
            response: self.response,
            evidence_verified: self.evidence_verified,
            evidence_total: self.evidence_total,
            cost,
        }
    }
}

/// What an agent task hands back to the join point.
enum AgentFinish {
    Done(AgentOutcome),
    Validated(ValidatedRun),
}

impl AgentFinish {
    fn sort_into(
        self,
        identity: AgentIdentity,
        outcomes: &mut BTreeMap<AgentIdentity, AgentOutcome>,
        billable: &mut Vec<(AgentIdentity, ValidatedRun)>,
    ) {
        match self {
            AgentFinish::Done(outcome) => {
                outcomes.insert(identity, outcome);
            }
            AgentFinish::Validated(run) => billable.push((identity, run)),
        }
    }
}

impl AgentTask {
    /// Run the agent; a panic becomes a provider error for this agent only.
    async fn run_isolated(self) -> (AgentIdentity, AgentFinish) {
        let identity = self.identity;
        let model_id = self.model_id.clone();
        let metrics = self.metrics.clone();

        match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(finish) => (identity, finish),
            Err(_) => {
                error!(agent = %identity, model = %model_id, "Agent task panicked");
                metrics.record_agent_outcome(identity.name(), "provider_error", None);
                (
                    identity,
                    AgentFinish::Done(AgentOutcome::ProviderError {
                        model_id,
                        throttled: false,
                        message: "agent task panicked".to_string(),
                    }),
                )
            }
        }
    }

    #[instrument(skip_all, fields(submission_id = %self.submission_id, agent = %self.identity, model = %self.model_id))]
    async fn run(self) -> AgentFinish {
        let request = AgentRequest {
            identity: self.identity,
            system_prompt: &self.system_prompt,
            model_id: &self.model_id,
            repo: &self.repo,
            rubric: &self.rubric,
            max_retries: self.max_retries,
        };

        let run = match self.runner.run(request).await {
            Ok(run) => run,
            Err(err) => return AgentFinish::Done(self.failure(err)),
        };
        self.metrics.record_usage(&self.model_id, run.usage);

        let mut response = run.response;
        let report = validate_evidence(response.evidence(), &self.repo);
        debug!(
            verified = report.verified_count,
            total = report.total_count,
            "Evidence checked"
        );
        let (evidence_verified, evidence_total) = (report.verified_count, report.total_count);
        response.replace_evidence(report.items);

        AgentFinish::Validated(ValidatedRun {
            model_id: self.model_id,
            attempts: run.attempts,
            provider_calls: run.provider_calls,
            usage: run.usage,
            response,
            evidence_verified,
            evidence_total,
        })
    }

    fn failure(&self, err: AgentError) -> AgentOutcome {
        warn!(error = %err, kind = err.kind(), "Agent failed");
        let outcome = match err {
            AgentError::SchemaValidationFailed {
                attempts,
                issues,
                usage,
                ..
            } => {
                self.metrics.record_usage(&self.model_id, usage);
                AgentOutcome::SchemaFailed {
                    model_id: self.model_id.clone(),
                    attempts,
                    issues: issues.iter().map(ToString::to_string).collect(),
                    usage,
                }
            }
            AgentError::ProviderThrottled { message, .. } => AgentOutcome::ProviderError {
                model_id: self.model_id.clone(),
                throttled: true,
                message,
            },
            AgentError::ProviderError(source) => AgentOutcome::ProviderError {
                model_id: self.model_id.clone(),
                throttled: false,
                message: source.to_string(),
            },
        };
        self.metrics
            .record_agent_outcome(self.identity.name(), outcome.kind(), None);
        outcome
    }
}
