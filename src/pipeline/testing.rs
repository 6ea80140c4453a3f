//! Shared fixtures for orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::json;

use super::config::EvaluationConfig;
use super::orchestrator::SubmissionOrchestrator;
use crate::agents::{AgentIdentity, AgentRunner};
use crate::context::{ContextProvider, RepoData};
use crate::error::{ContextError, LlmError};
use crate::llm::cost::{CostRecord, CostTracker, ModelRate, RateTable};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider, TokenUsage};
use crate::scoring::RubricWeights;
use crate::storage::{CostStore, CostSummary, InMemoryCostStore, StoreError};

/// How the mock model answers one agent.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Valid response with every category scored `score`.
    Valid(f64),
    /// Structurally invalid response on every attempt.
    Invalid,
    /// Non-throttling provider failure.
    Fail,
    /// Never answers.
    Hang,
    /// Panics inside the provider call.
    Panic,
}

pub fn model_for(identity: AgentIdentity) -> String {
    format!("mock/{}", identity)
}

pub fn valid_response(identity: AgentIdentity, score: f64) -> String {
    let scores: serde_json::Map<String, serde_json::Value> = identity
        .categories()
        .iter()
        .map(|c| (c.to_string(), json!(score)))
        .collect();
    let mut value = json!({
        "prompt_version": format!("{}.v1", identity),
        "summary": format!("{} review", identity),
        "scores": scores,
        "evidence": [
            {"finding": "entry point", "file": "src/main.rs", "line": 2, "severity": "low"},
            {"finding": "made up", "file": "src/ghost.rs", "severity": "high"}
        ],
    });
    let extra = match identity {
        AgentIdentity::BugHunter => json!({"bugs": []}),
        AgentIdentity::PerformanceAnalyzer => json!({"bottlenecks": ["none found"]}),
        AgentIdentity::InnovationScorer => json!({"standout_features": ["cli"]}),
        AgentIdentity::AIDetection => json!({"ai_likelihood": 0.1, "signals": []}),
    };
    if let (Some(target), Some(fields)) = (value.as_object_mut(), extra.as_object()) {
        target.extend(fields.clone());
    }
    value.to_string()
}

/// Model keyed by model id; every call reports 1000 input and 500 output tokens.
pub struct MockModel {
    scripts: HashMap<String, (AgentIdentity, Script)>,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new(scripts: &[(AgentIdentity, Script)]) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .iter()
                .map(|(identity, script)| (model_for(*identity), (*identity, *script)))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockModel {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (identity, script) = self
            .scripts
            .get(&request.model)
            .copied()
            .ok_or_else(|| LlmError::RequestFailed(format!("unknown model {}", request.model)))?;
        let content = match script {
            Script::Valid(score) => valid_response(identity, score),
            Script::Invalid => "I could not produce JSON today.".to_string(),
            Script::Fail => {
                return Err(LlmError::ApiError {
                    code: 500,
                    message: "upstream exploded".to_string(),
                })
            }
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                String::new()
            }
            Script::Panic => panic!("provider bug"),
        };
        Ok(GenerationResponse {
            model: request.model,
            content,
            usage: TokenUsage::new(1000, 500),
        })
    }
}

/// Context provider serving a fixed snapshot, or failing every fetch.
pub struct StaticContext {
    repo: Option<RepoData>,
    fetches: AtomicUsize,
}

impl StaticContext {
    pub fn serving(repo: RepoData) -> Arc<Self> {
        Arc::new(Self {
            repo: Some(repo),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            repo: None,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    async fn fetch(&self, repo_url: &str, _ci_ref: Option<&str>) -> Result<RepoData, ContextError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.repo {
            Some(repo) => Ok(RepoData {
                repo_url: repo_url.to_string(),
                ..repo.clone()
            }),
            None => Err(ContextError::unavailable(repo_url, "clone failed")),
        }
    }
}

/// Store that rejects every write.
pub struct FailingStore;

#[async_trait]
impl CostStore for FailingStore {
    async fn put(&self, _record: &CostRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }

    async fn aggregate(&self, _hackathon_id: &str) -> Result<CostSummary, StoreError> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }
}

/// Store whose writes never complete.
pub struct HangingStore;

#[async_trait]
impl CostStore for HangingStore {
    async fn put(&self, _record: &CostRecord) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn aggregate(&self, _hackathon_id: &str) -> Result<CostSummary, StoreError> {
        Ok(CostSummary::default())
    }
}

pub fn repo() -> RepoData {
    RepoData::new("file:///submissions/team")
        .with_file("src/main.rs", 40)
        .with_file("README.md", 12)
}

pub fn config() -> EvaluationConfig {
    AgentIdentity::ALL.into_iter().fold(
        EvaluationConfig::default()
            .with_hackathon_id("spring-hack")
            .with_throttle(3, Duration::from_millis(10))
            .with_submission_timeout(Duration::from_secs(30)),
        |config, identity| config.with_agent_model(identity, model_for(identity)),
    )
}

pub fn rates() -> Arc<RateTable> {
    Arc::new(RateTable::new().with_default(ModelRate::new(dec!(0.00000006), dec!(0.00000024))))
}

pub fn orchestrator(
    context: Arc<dyn ContextProvider>,
    model: Arc<MockModel>,
    store: Arc<dyn CostStore>,
    config: EvaluationConfig,
) -> SubmissionOrchestrator {
    let runner = Arc::new(AgentRunner::new(model, config.runner_config()));
    let costs = Arc::new(
        CostTracker::new(config.hackathon_id.clone(), rates(), store)
            .with_write_timeout(config.cost_write_timeout),
    );
    SubmissionOrchestrator::new(
        context,
        runner,
        costs,
        Arc::new(RubricWeights::default()),
        config,
    )
}

pub fn memory_store() -> Arc<InMemoryCostStore> {
    Arc::new(InMemoryCostStore::new())
}
