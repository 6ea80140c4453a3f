//! Model invocation and cost metering.
//!
//! Agents talk to models through the [`LlmProvider`] trait. The bundled
//! [`LiteLlmClient`] speaks the OpenAI-compatible chat completions protocol
//! used by LiteLLM proxies and OpenRouter.
//!
//! ```ignore
//! use hack_judge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("openai/gpt-4o-mini", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! println!("{} ({} tokens)", response.content, response.usage.total());
//! ```
//!
//! # Cost Tracking
//!
//! [`CostTracker`] prices each agent's summed usage with a [`RateTable`] and
//! writes one [`CostRecord`] per submission and agent:
//!
//! ```ignore
//! use hack_judge::llm::{CostTracker, RateTable};
//!
//! let tracker = CostTracker::new("spring-hack", Arc::new(RateTable::load("rates.yaml")?), store);
//! let record = tracker.record("team-7", AgentIdentity::BugHunter, "openai/gpt-4o-mini", usage).await?;
//! ```

pub mod cost;
pub mod litellm;

pub use cost::{CostError, CostRecord, CostTracker, ModelRate, RateTable, RateTableError};
pub use litellm::{
    GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, TokenUsage,
    DEFAULT_MODEL,
};
