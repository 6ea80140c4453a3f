//! Scoring agents: identities, response schemas, prompts and the runner.

pub mod error;
pub mod identity;
pub mod prompts;
pub mod response;
pub mod runner;

pub use error::{AgentError, AgentResult};
pub use identity::{AgentIdentity, AgentName, UnknownAgent};
pub use prompts::{build_user_message, default_system_prompt, prompt_version, repair_instruction};
pub use response::{
    parse_agent_response, AgentResponse, AiDetectionResponse, BugHunterResponse, BugReport,
    Evidence, FieldIssue, InnovationResponse, PerformanceResponse, ResponseEnvelope, Severity,
};
pub use runner::{AgentRequest, AgentRun, AgentRunner, RunnerConfig};
