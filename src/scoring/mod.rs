//! Rubric weights and score aggregation.
//!
//! Agent scores are combined per the hackathon's [`RubricWeights`]; agents
//! that failed are handled according to its [`MissingAgentPolicy`].

pub mod aggregator;
pub mod rubric;

pub use aggregator::{
    agent_score, aggregate, leaderboard, LeaderboardEntry, RankCandidate, ScoreBreakdown,
};
pub use rubric::{AgentRubric, MissingAgentPolicy, RubricError, RubricWeights};
