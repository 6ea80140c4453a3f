//! Error types for agent runs.
//!
//! Agent errors are scoped to one agent of one submission: the orchestrator
//! turns them into outcomes and diagnostics, they never fail a batch.

use thiserror::Error;

use super::identity::AgentIdentity;
use super::response::FieldIssue;
use crate::error::LlmError;
use crate::llm::TokenUsage;

/// Errors that can occur while running a single agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model never produced a response matching the agent's schema.
    #[error("{agent} response failed schema validation after {attempts} attempts: {}", format_issues(.issues))]
    SchemaValidationFailed {
        agent: AgentIdentity,
        attempts: u32,
        issues: Vec<FieldIssue>,
        /// Tokens spent across all attempts.
        usage: TokenUsage,
    },

    /// The provider kept rate limiting after the maximum number of attempts.
    #[error("Provider throttled after {attempts} attempts: {message}")]
    ProviderThrottled { attempts: u32, message: String },

    /// Any other provider failure.
    #[error("Provider error: {0}")]
    ProviderError(#[source] LlmError),
}

impl AgentError {
    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::SchemaValidationFailed { .. } => "schema_failed",
            AgentError::ProviderThrottled { .. } => "provider_throttled",
            AgentError::ProviderError(_) => "provider_error",
        }
    }

    /// Schema attempts made before the error, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            AgentError::SchemaValidationFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
