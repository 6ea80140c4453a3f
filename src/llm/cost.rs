//! Cost tracking for agent model usage.
//!
//! Every successfully resolved agent call is priced once and written to a
//! [`CostStore`]. Prices are exact decimals: `input_tokens * rate.input +
//! output_tokens * rate.output`, rounded to 6 decimal places.
//!
//! Rates are USD per token and are loaded from YAML:
//!
//! ```yaml
//! default: { input: "0.000003", output: "0.000015" }
//! models:
//!   openai/gpt-4o-mini: { input: "0.00000015", output: "0.0000006" }
//!   anthropic/claude-sonnet-4.5: { input: "0.000003", output: "0.000015" }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use super::litellm::TokenUsage;
use crate::agents::{AgentIdentity, AgentName};
use crate::storage::{CostStore, CostSummary, StoreError};

/// Decimal places kept in every computed cost.
pub const COST_DECIMAL_PLACES: u32 = 6;

/// Default limit on one store write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-token prices for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRate {
    /// USD per input token.
    pub input: Decimal,
    /// USD per output token.
    pub output: Decimal,
}

impl ModelRate {
    pub fn new(input: Decimal, output: Decimal) -> Self {
        Self { input, output }
    }

    /// Price `usage`, rounded to [`COST_DECIMAL_PLACES`].
    pub fn price(&self, usage: TokenUsage) -> Decimal {
        let raw = Decimal::from(usage.input_tokens) * self.input
            + Decimal::from(usage.output_tokens) * self.output;
        raw.round_dp(COST_DECIMAL_PLACES)
    }
}

/// Errors that can occur while loading a rate table.
#[derive(Debug, Error)]
pub enum RateTableError {
    #[error("Failed to read rate table '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rate table: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Negative rate for model '{0}'")]
    NegativeRate(String),
}

/// Prices per model, with an optional fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    #[serde(default)]
    pub models: BTreeMap<String, ModelRate>,
    #[serde(default)]
    pub default: Option<ModelRate>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model_id: impl Into<String>, rate: ModelRate) -> Self {
        self.models.insert(model_id.into(), rate);
        self
    }

    pub fn with_default(mut self, rate: ModelRate) -> Self {
        self.default = Some(rate);
        self
    }

    /// Parse a rate table from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, RateTableError> {
        let table: Self = serde_yaml::from_str(yaml)?;
        let negative = table
            .models
            .iter()
            .map(|(model, rate)| (model.as_str(), rate))
            .chain(table.default.iter().map(|rate| ("default", rate)))
            .find(|(_, rate)| rate.input.is_sign_negative() || rate.output.is_sign_negative());
        if let Some((model, _)) = negative {
            return Err(RateTableError::NegativeRate(model.to_string()));
        }
        Ok(table)
    }

    /// Load a rate table file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RateTableError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| RateTableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Rate for `model_id`, falling back to the default.
    pub fn rate_for(&self, model_id: &str) -> Option<ModelRate> {
        self.models.get(model_id).copied().or(self.default)
    }
}

/// The priced, persisted account of one agent's usage for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    pub hackathon_id: String,
    pub submission_id: String,
    pub agent_name: AgentName,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Errors from [`CostTracker::record`].
#[derive(Debug, Error)]
pub enum CostError {
    /// The record was priced but the store rejected it. The full record is
    /// carried so the caller can log or replay it.
    #[error("Failed to persist cost record for {}/{}: {source}", .record.submission_id, .record.agent_name)]
    PersistenceFailed {
        record: Box<CostRecord>,
        #[source]
        source: StoreError,
    },

    /// No rate is configured for the model and there is no default.
    #[error("No rate configured for model '{model_id}' ({submission_id}/{agent})")]
    UnpricedModel {
        submission_id: String,
        agent: AgentName,
        model_id: String,
    },
}

/// Prices and persists agent usage for one hackathon.
pub struct CostTracker {
    hackathon_id: String,
    rates: Arc<RateTable>,
    store: Arc<dyn CostStore>,
    write_timeout: Duration,
}

impl CostTracker {
    pub fn new(
        hackathon_id: impl Into<String>,
        rates: Arc<RateTable>,
        store: Arc<dyn CostStore>,
    ) -> Self {
        Self {
            hackathon_id: hackathon_id.into(),
            rates,
            store,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Bound each store write; a write that outlives it is a persistence failure.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn hackathon_id(&self) -> &str {
        &self.hackathon_id
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Price one agent's usage and write the record.
    ///
    /// # Errors
    ///
    /// - `UnpricedModel` if `model_id` has no rate
    /// - `PersistenceFailed` if the store rejects the write; the record is
    ///   returned inside the error
    pub async fn record(
        &self,
        submission_id: &str,
        agent: AgentIdentity,
        model_id: &str,
        usage: TokenUsage,
    ) -> Result<CostRecord, CostError> {
        let agent_name = agent.name();
        let rate = self
            .rates
            .rate_for(model_id)
            .ok_or_else(|| CostError::UnpricedModel {
                submission_id: submission_id.to_string(),
                agent: agent_name,
                model_id: model_id.to_string(),
            })?;

        let record = CostRecord {
            hackathon_id: self.hackathon_id.clone(),
            submission_id: submission_id.to_string(),
            agent_name,
            model_id: model_id.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_cost_usd: rate.price(usage),
            recorded_at: Utc::now(),
        };

        let written = tokio::time::timeout(self.write_timeout, self.store.put(&record))
            .await
            .unwrap_or(Err(StoreError::TimedOut(self.write_timeout)));
        match written {
            Ok(()) => {
                debug!(
                    submission_id,
                    agent = %agent_name,
                    model = model_id,
                    cost_usd = %record.total_cost_usd,
                    "Cost recorded"
                );
                Ok(record)
            }
            Err(source) => {
                error!(
                    submission_id,
                    agent = %agent_name,
                    model = model_id,
                    input_tokens = record.input_tokens,
                    output_tokens = record.output_tokens,
                    cost_usd = %record.total_cost_usd,
                    error = %source,
                    "Cost record write failed"
                );
                Err(CostError::PersistenceFailed {
                    record: Box::new(record),
                    source,
                })
            }
        }
    }

    /// Spend so far for this tracker's hackathon.
    pub async fn summary(&self) -> Result<CostSummary, StoreError> {
        self.store.aggregate(&self.hackathon_id).await
    }
}
