//! Error types for hack-judge operations.
//!
//! Subsystem errors that are shared across modules live here:
//! - Model invocation (LLM API interactions)
//! - Repository context snapshots
//!
//! Errors owned by a single subsystem (agents, cost tracking, storage,
//! configuration, rubric loading) are defined next to that subsystem.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Whether the provider asked us to slow down.
    ///
    /// Throttling is the only provider condition that is retried; everything
    /// else is reported to the caller on first occurrence.
    pub fn is_throttled(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }
}

/// Errors that can occur while building a repository snapshot.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Repository '{repo_url}' unavailable: {reason}")]
    RepoUnavailable { repo_url: String, reason: String },

    #[error("IO error while reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ContextError {
    /// Convenience constructor for the common unavailable case.
    pub fn unavailable(repo_url: impl Into<String>, reason: impl Into<String>) -> Self {
        ContextError::RepoUnavailable {
            repo_url: repo_url.into(),
            reason: reason.into(),
        }
    }
}
