//! Evaluation configuration.
//!
//! Covers concurrency limits, timeouts, the repair and throttle budgets, model
//! selection per agent, and where rubric, rates and cost records live.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agents::runner::{
    RunnerConfig, DEFAULT_MAX_RETRIES, DEFAULT_THROTTLE_BASE_DELAY, DEFAULT_THROTTLE_MAX_ATTEMPTS,
};
use crate::agents::AgentIdentity;
use crate::llm::cost::DEFAULT_WRITE_TIMEOUT;
use crate::llm::litellm::DEFAULT_MODEL;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for an evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Hackathon the evaluated submissions belong to; scopes cost records.
    pub hackathon_id: String,

    // Agent settings
    /// Agents run for every submission.
    pub agents: Vec<AgentIdentity>,
    /// Model used by agents without an override.
    pub default_model: String,
    /// Per-agent model overrides.
    pub agent_models: BTreeMap<AgentIdentity, String>,
    /// Repair attempts after the first response.
    pub max_retries: u32,
    /// Provider calls per model call while rate limited.
    pub throttle_max_attempts: u32,
    /// Backoff before the first throttle retry.
    pub throttle_base_delay: Duration,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per response.
    pub max_tokens: u32,

    // Execution settings
    /// Submissions evaluated at the same time.
    pub max_concurrent_submissions: usize,
    /// Wall-clock limit for one submission, all agents included.
    pub submission_timeout: Duration,
    /// Limit on one cost store write. Runs after the agent finished, outside
    /// the submission timeout.
    pub cost_write_timeout: Duration,

    // Storage settings
    /// PostgreSQL URL for cost records; in-memory store when unset.
    pub database_url: Option<String>,
    /// Rubric YAML; default rubric when unset.
    pub rubric_path: Option<PathBuf>,
    /// Rate table YAML.
    pub rates_path: Option<PathBuf>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            hackathon_id: "default".to_string(),

            agents: AgentIdentity::ALL.to_vec(),
            default_model: DEFAULT_MODEL.to_string(),
            agent_models: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            throttle_max_attempts: DEFAULT_THROTTLE_MAX_ATTEMPTS,
            throttle_base_delay: DEFAULT_THROTTLE_BASE_DELAY,
            temperature: 0.2,
            max_tokens: 4096,

            max_concurrent_submissions: 4,
            submission_timeout: Duration::from_secs(600),
            cost_write_timeout: DEFAULT_WRITE_TIMEOUT,

            database_url: None,
            rubric_path: None,
            rates_path: None,
        }
    }
}

impl EvaluationConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JUDGE_HACKATHON_ID`: Hackathon id (default: default)
    /// - `JUDGE_AGENTS`: Comma-separated canonical agent names (default: all)
    /// - `JUDGE_DEFAULT_MODEL`: Default model (default: anthropic/claude-sonnet-4.5)
    /// - `JUDGE_MODEL_<AGENT>`: Model override, e.g. `JUDGE_MODEL_BUG_HUNTER`
    /// - `JUDGE_MAX_RETRIES`: Repair attempts (default: 2)
    /// - `JUDGE_THROTTLE_MAX_ATTEMPTS`: Provider calls while throttled (default: 3)
    /// - `JUDGE_THROTTLE_BASE_DELAY_MS`: First backoff in ms (default: 2000)
    /// - `JUDGE_TEMPERATURE`: Sampling temperature (default: 0.2)
    /// - `JUDGE_MAX_TOKENS`: Tokens per response (default: 4096)
    /// - `JUDGE_MAX_CONCURRENT_SUBMISSIONS`: Parallel submissions (default: 4)
    /// - `JUDGE_SUBMISSION_TIMEOUT_SECS`: Per-submission timeout (default: 600)
    /// - `JUDGE_COST_WRITE_TIMEOUT_SECS`: Per cost write (default: 10)
    /// - `DATABASE_URL`: PostgreSQL URL (optional)
    /// - `JUDGE_RUBRIC_PATH`: Rubric YAML (optional)
    /// - `JUDGE_RATES_PATH`: Rate table YAML (optional)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EvaluationConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("JUDGE_HACKATHON_ID") {
            config.hackathon_id = val;
        }

        // Agent settings
        if let Some(val) = lookup("JUDGE_AGENTS") {
            config.agents = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_env_value(s, "JUDGE_AGENTS"))
                .collect::<Result<_, _>>()?;
        }

        if let Some(val) = lookup("JUDGE_DEFAULT_MODEL") {
            config.default_model = val;
        }

        for agent in AgentIdentity::ALL {
            let key = format!("JUDGE_MODEL_{}", agent.as_str().to_uppercase());
            if let Some(val) = lookup(&key) {
                config.agent_models.insert(agent, val);
            }
        }

        if let Some(val) = lookup("JUDGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "JUDGE_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("JUDGE_THROTTLE_MAX_ATTEMPTS") {
            config.throttle_max_attempts = parse_env_value(&val, "JUDGE_THROTTLE_MAX_ATTEMPTS")?;
        }

        if let Some(val) = lookup("JUDGE_THROTTLE_BASE_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "JUDGE_THROTTLE_BASE_DELAY_MS")?;
            config.throttle_base_delay = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("JUDGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "JUDGE_TEMPERATURE")?;
        }

        if let Some(val) = lookup("JUDGE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "JUDGE_MAX_TOKENS")?;
        }

        // Execution settings
        if let Some(val) = lookup("JUDGE_MAX_CONCURRENT_SUBMISSIONS") {
            config.max_concurrent_submissions =
                parse_env_value(&val, "JUDGE_MAX_CONCURRENT_SUBMISSIONS")?;
        }

        if let Some(val) = lookup("JUDGE_SUBMISSION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_SUBMISSION_TIMEOUT_SECS")?;
            config.submission_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("JUDGE_COST_WRITE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_COST_WRITE_TIMEOUT_SECS")?;
            config.cost_write_timeout = Duration::from_secs(secs);
        }

        // Storage settings
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        config.rubric_path = lookup("JUDGE_RUBRIC_PATH").map(PathBuf::from);
        config.rates_path = lookup("JUDGE_RATES_PATH").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hackathon_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "hackathon_id cannot be empty".to_string(),
            ));
        }

        if self.agents.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one agent must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        if let Some(duplicate) = self.agents.iter().find(|agent| !seen.insert(**agent)) {
            return Err(ConfigError::ValidationFailed(format!(
                "agent '{}' is configured twice",
                duplicate
            )));
        }

        if self.default_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "default_model cannot be empty".to_string(),
            ));
        }

        if let Some((agent, _)) = self.agent_models.iter().find(|(_, model)| model.is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "model override for '{}' cannot be empty",
                agent
            )));
        }

        if self.throttle_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "throttle_max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_submissions == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_submissions must be greater than 0".to_string(),
            ));
        }

        if self.submission_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "submission_timeout must be greater than 0".to_string(),
            ));
        }

        if self.cost_write_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "cost_write_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Model used by `agent`.
    pub fn model_for(&self, agent: AgentIdentity) -> &str {
        self.agent_models
            .get(&agent)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// Runner tuning derived from this configuration.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            throttle_max_attempts: self.throttle_max_attempts,
            throttle_base_delay: self.throttle_base_delay,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Builder method to set the hackathon id.
    pub fn with_hackathon_id(mut self, id: impl Into<String>) -> Self {
        self.hackathon_id = id.into();
        self
    }

    /// Builder method to set the configured agents.
    pub fn with_agents(mut self, agents: Vec<AgentIdentity>) -> Self {
        self.agents = agents;
        self
    }

    /// Builder method to set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Builder method to override one agent's model.
    pub fn with_agent_model(mut self, agent: AgentIdentity, model: impl Into<String>) -> Self {
        self.agent_models.insert(agent, model.into());
        self
    }

    /// Builder method to set the repair budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method to set the throttle backoff.
    pub fn with_throttle(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.throttle_max_attempts = max_attempts;
        self.throttle_base_delay = base_delay;
        self
    }

    /// Builder method to set submission concurrency.
    pub fn with_max_concurrent_submissions(mut self, max: usize) -> Self {
        self.max_concurrent_submissions = max;
        self
    }

    /// Builder method to set the submission timeout.
    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    /// Builder method to bound each cost store write.
    pub fn with_cost_write_timeout(mut self, timeout: Duration) -> Self {
        self.cost_write_timeout = timeout;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Builder method to set the rubric path.
    pub fn with_rubric_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rubric_path = Some(path.into());
        self
    }

    /// Builder method to set the rate table path.
    pub fn with_rates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rates_path = Some(path.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
