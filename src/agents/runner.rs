//! Agent runner: prompt, validate, repair.
//!
//! One run is a bounded state machine:
//!
//! ```text
//! Attempt(n) --model output--> Validate(n) --ok--> Success(attempts = n)
//!                                   |
//!                                issues
//!                                   v
//!                              Repair(n) --n > max_retries--> SchemaValidationFailed(attempts = n)
//!                                   |
//!                                   +--> Attempt(n + 1)
//! ```
//!
//! Rate limiting is handled below the state machine: a throttled model call
//! is retried with exponential backoff and only counts as one attempt once it
//! returns. The runner never persists anything.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::error::{AgentError, AgentResult};
use super::identity::AgentIdentity;
use super::prompts::{build_user_message, repair_instruction};
use super::response::{parse_agent_response, AgentResponse, FieldIssue};
use crate::context::RepoData;
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider, Message, TokenUsage};
use crate::scoring::AgentRubric;

/// Default number of repair attempts after the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default number of provider calls per model call while throttled.
pub const DEFAULT_THROTTLE_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first throttle retry.
pub const DEFAULT_THROTTLE_BASE_DELAY: Duration = Duration::from_secs(2);

/// Tuning for [`AgentRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Provider calls allowed per model call while rate limited.
    pub throttle_max_attempts: u32,
    /// Backoff before the first throttle retry; doubles on each retry.
    pub throttle_base_delay: Duration,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            throttle_max_attempts: DEFAULT_THROTTLE_MAX_ATTEMPTS,
            throttle_base_delay: DEFAULT_THROTTLE_BASE_DELAY,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Everything one agent run needs.
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub identity: AgentIdentity,
    pub system_prompt: &'a str,
    pub model_id: &'a str,
    pub repo: &'a RepoData,
    pub rubric: &'a AgentRubric,
    /// Repair attempts allowed after the first attempt.
    pub max_retries: u32,
}

/// A successful agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub response: AgentResponse,
    /// Tokens summed over every attempt.
    pub usage: TokenUsage,
    /// Schema attempts made, including the successful one.
    pub attempts: u32,
    /// Provider calls made, including throttled ones.
    pub provider_calls: u32,
}

enum RunState {
    Attempt { number: u32 },
    Validate { number: u32, raw: String },
    Repair { number: u32, issues: Vec<FieldIssue> },
}

/// Runs agents against a model provider.
pub struct AgentRunner {
    llm: Arc<dyn LlmProvider>,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmProvider>, config: RunnerConfig) -> Self {
        Self { llm, config }
    }

    pub fn with_defaults(llm: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm, RunnerConfig::default())
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one agent until it returns a valid response or the attempt budget
    /// is spent.
    ///
    /// # Errors
    ///
    /// - `SchemaValidationFailed` after `max_retries + 1` invalid responses
    /// - `ProviderThrottled` when a model call stays rate limited
    /// - `ProviderError` on any other provider failure
    #[instrument(skip_all, fields(agent = %request.identity, model = %request.model_id))]
    pub async fn run(&self, request: AgentRequest<'_>) -> AgentResult<AgentRun> {
        let identity = request.identity;
        let mut messages = vec![
            Message::system(request.system_prompt),
            Message::user(build_user_message(identity, request.repo, request.rubric)),
        ];
        let mut usage = TokenUsage::default();
        let mut provider_calls = 0u32;
        let mut state = RunState::Attempt { number: 1 };

        loop {
            state = match state {
                RunState::Attempt { number } => {
                    debug!(attempt = number, "Invoking model");
                    let response = self
                        .invoke(request.model_id, &messages, &mut provider_calls)
                        .await?;
                    usage += response.usage;
                    RunState::Validate {
                        number,
                        raw: response.content,
                    }
                }
                RunState::Validate { number, raw } => match parse_agent_response(identity, &raw) {
                    Ok(response) => {
                        info!(
                            attempts = number,
                            provider_calls,
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "Agent response accepted"
                        );
                        return Ok(AgentRun {
                            response,
                            usage,
                            attempts: number,
                            provider_calls,
                        });
                    }
                    Err(issues) => {
                        warn!(
                            attempt = number,
                            issues = issues.len(),
                            first_issue = %issues.first().map(ToString::to_string).unwrap_or_default(),
                            "Agent response rejected"
                        );
                        messages.push(Message::assistant(raw));
                        RunState::Repair { number, issues }
                    }
                },
                RunState::Repair { number, issues } => {
                    if number > request.max_retries {
                        return Err(AgentError::SchemaValidationFailed {
                            agent: identity,
                            attempts: number,
                            issues,
                            usage,
                        });
                    }
                    messages.push(Message::user(repair_instruction(identity, &issues)));
                    RunState::Attempt { number: number + 1 }
                }
            };
        }
    }

    /// One model call, retrying only while the provider is throttling.
    async fn invoke(
        &self,
        model_id: &str,
        messages: &[Message],
        provider_calls: &mut u32,
    ) -> AgentResult<GenerationResponse> {
        let mut throttled = 0u32;

        loop {
            *provider_calls += 1;
            let request = GenerationRequest::new(model_id, messages.to_vec())
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens);

            match self.llm.generate(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_throttled() => {
                    throttled += 1;
                    if throttled >= self.config.throttle_max_attempts {
                        warn!(attempts = throttled, error = %err, "Provider still throttling, giving up");
                        return Err(AgentError::ProviderThrottled {
                            attempts: throttled,
                            message: err.to_string(),
                        });
                    }
                    let delay = backoff_delay(self.config.throttle_base_delay, throttled);
                    warn!(
                        attempt = throttled,
                        delay_ms = delay.as_millis() as u64,
                        "Provider throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(AgentError::ProviderError(err)),
            }
        }
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider returning scripted replies in order and recording requests.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().expect("lock").len()
        }

        fn request(&self, idx: usize) -> GenerationRequest {
            self.requests.lock().expect("lock")[idx].clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock").push(request);
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::RequestFailed("script exhausted".into())));
            reply.map(|content| GenerationResponse {
                model: "mock-model".to_string(),
                content,
                usage: TokenUsage::new(100, 50),
            })
        }
    }

    fn valid_bug_hunter() -> serde_json::Value {
        json!({
            "prompt_version": "bug_hunter.v1",
            "summary": "Solid error handling overall.",
            "scores": {"security": 80, "error_handling": 70, "correctness": 90, "code_quality": 60},
            "evidence": [{"finding": "unchecked index", "file": "src/lib.rs", "line": 3, "severity": "medium"}],
            "bugs": []
        })
    }

    fn without_summary() -> String {
        let mut value = valid_bug_hunter();
        value.as_object_mut().expect("object").remove("summary");
        value.to_string()
    }

    fn repo() -> RepoData {
        RepoData::new("file:///tmp/team").with_file("src/lib.rs", 10)
    }

    fn request<'a>(
        repo: &'a RepoData,
        rubric: &'a AgentRubric,
        max_retries: u32,
    ) -> AgentRequest<'a> {
        AgentRequest {
            identity: AgentIdentity::BugHunter,
            system_prompt: "You review code.",
            model_id: "test-model",
            repo,
            rubric,
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_missing_summary_is_repaired_on_second_attempt() {
        let provider = ScriptedProvider::new(vec![
            Ok(without_summary()),
            Ok(valid_bug_hunter().to_string()),
        ]);
        let runner = AgentRunner::with_defaults(provider.clone());
        let repo = repo();
        let rubric = AgentRubric::uniform(AgentIdentity::BugHunter, 25.0);

        let run = runner
            .run(request(&repo, &rubric, DEFAULT_MAX_RETRIES))
            .await
            .expect("repaired run succeeds");

        assert_eq!(run.attempts, 2);
        assert_eq!(run.provider_calls, 2);
        assert_eq!(run.usage, TokenUsage::new(200, 100));
        assert_eq!(run.response.identity(), AgentIdentity::BugHunter);

        // The repair request carries the rejected exchange and names the field.
        let repair = provider.request(1);
        assert_eq!(repair.messages.len(), 4);
        assert_eq!(repair.messages[2].role, "assistant");
        assert!(repair.messages[3].content.contains("`summary`: missing"));
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let provider = ScriptedProvider::new(vec![
            Ok(without_summary()),
            Ok(without_summary()),
            Ok(without_summary()),
            Ok(valid_bug_hunter().to_string()),
        ]);
        let runner = AgentRunner::with_defaults(provider.clone());
        let repo = repo();
        let rubric = AgentRubric::uniform(AgentIdentity::BugHunter, 25.0);

        let err = runner
            .run(request(&repo, &rubric, 2))
            .await
            .expect_err("budget exhausted");

        match err {
            AgentError::SchemaValidationFailed {
                attempts,
                issues,
                usage,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(issues, vec![FieldIssue::new("summary", "missing")]);
                assert_eq!(usage, TokenUsage::new(300, 150));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let provider = ScriptedProvider::new(vec![Ok("not json".to_string())]);
        let runner = AgentRunner::with_defaults(provider.clone());
        let repo = repo();
        let rubric = AgentRubric::uniform(AgentIdentity::BugHunter, 25.0);

        let err = runner.run(request(&repo, &rubric, 0)).await.expect_err("fails");
        assert_eq!(err.attempts(), Some(1));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_backs_off_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::RateLimited("429".into())),
            Ok(valid_bug_hunter().to_string()),
        ]);
        let runner = AgentRunner::with_defaults(provider.clone());
        let repo = repo();
        let rubric = AgentRubric::uniform(AgentIdentity::BugHunter, 25.0);

        let started = tokio::time::Instant::now();
        let run = runner
            .run(request(&repo, &rubric, DEFAULT_MAX_RETRIES))
            .await
            .expect("succeeds after backoff");

        assert_eq!(run.attempts, 1);
        assert_eq!(run.provider_calls, 3);
        // 2s + 4s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_throttling_escalates() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::RateLimited("429".into())),
            Ok(valid_bug_hunter().to_string()),
        ]);
        let runner = AgentRunner::with_defaults(provider.clone());
        let repo = repo();
        let rubric = AgentRubric::uniform(AgentIdentity::BugHunter, 25.0);

        let err = runner
            .run(request(&repo, &rubric, DEFAULT_MAX_RETRIES))
            .await
            .expect_err("throttled");
        assert!(matches!(err, AgentError::ProviderThrottled { attempts: 3, .. }));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_other_provider_errors_fail_immediately() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::ApiError {
                code: 500,
                message: "upstream".into(),
            }),
            Ok(valid_bug_hunter().to_string()),
        ]);
        let runner = AgentRunner::with_defaults(provider.clone());
        let repo = repo();
        let rubric = AgentRubric::uniform(AgentIdentity::BugHunter, 25.0);

        let err = runner
            .run(request(&repo, &rubric, DEFAULT_MAX_RETRIES))
            .await
            .expect_err("provider error");
        assert!(matches!(err, AgentError::ProviderError(LlmError::ApiError { code: 500, .. })));
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }
}
