//! hack-judge: multi-agent evaluation engine for hackathon submissions.
//!
//! Each submission is scored by independent AI agents (bug hunting,
//! performance, innovation, AI-authorship detection). Agent responses are
//! schema-checked and repaired, their evidence is verified against the
//! repository snapshot, every model call is priced and persisted, and the
//! per-agent results are combined into a weighted score and a leaderboard.

pub mod agents;
pub mod cli;
pub mod context;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod scoring;
pub mod storage;
pub mod utils;
pub mod validation;

pub use error::{ContextError, LlmError};
