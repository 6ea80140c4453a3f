//! Rubric weights for combining agent scores.
//!
//! A rubric assigns each agent a weight (the four weights sum to 100) and,
//! within each agent, a weight per declared category (again summing to 100).
//! Rubrics are loaded from YAML:
//!
//! ```yaml
//! missing_agent_policy: renormalize
//! agents:
//!   bug_hunter:
//!     weight: 30
//!     categories: { security: 40, error_handling: 20, correctness: 30, code_quality: 10 }
//!   performance_analyzer:
//!     weight: 20
//!     categories: { efficiency: 40, scalability: 40, resource_usage: 20 }
//!   # ...
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::AgentIdentity;

/// Weights must sum to this value.
pub const WEIGHT_TOTAL: f64 = 100.0;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Errors that can occur while loading a rubric.
#[derive(Debug, Error)]
pub enum RubricError {
    #[error("Failed to read rubric '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rubric: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid rubric: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// How agents that did not produce a score affect the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingAgentPolicy {
    /// Divide by the weight of the agents that succeeded.
    #[default]
    Renormalize,
    /// Treat a missing agent as scoring zero.
    ZeroFill,
}

/// One agent's share of the total and its category weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRubric {
    pub weight: f64,
    pub categories: BTreeMap<String, f64>,
}

impl AgentRubric {
    /// Equal weight for every category the agent declares.
    pub fn uniform(identity: AgentIdentity, weight: f64) -> Self {
        let declared = identity.categories();
        let share = WEIGHT_TOTAL / declared.len() as f64;
        Self {
            weight,
            categories: declared.iter().map(|c| (c.to_string(), share)).collect(),
        }
    }
}

/// Full rubric for a hackathon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricWeights {
    pub agents: BTreeMap<AgentIdentity, AgentRubric>,
    #[serde(default)]
    pub missing_agent_policy: MissingAgentPolicy,
}

impl Default for RubricWeights {
    fn default() -> Self {
        let share = WEIGHT_TOTAL / AgentIdentity::ALL.len() as f64;
        Self {
            agents: AgentIdentity::ALL
                .into_iter()
                .map(|agent| (agent, AgentRubric::uniform(agent, share)))
                .collect(),
            missing_agent_policy: MissingAgentPolicy::default(),
        }
    }
}

impl RubricWeights {
    /// Parse and validate a rubric from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, RubricError> {
        let rubric: Self = serde_yaml::from_str(yaml)?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Load and validate a rubric file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| RubricError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn with_missing_agent_policy(mut self, policy: MissingAgentPolicy) -> Self {
        self.missing_agent_policy = policy;
        self
    }

    pub fn agent(&self, identity: AgentIdentity) -> Option<&AgentRubric> {
        self.agents.get(&identity)
    }

    /// Check every weight constraint, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns `RubricError::Invalid` listing each problem.
    pub fn validate(&self) -> Result<(), RubricError> {
        let mut problems = Vec::new();

        for agent in AgentIdentity::ALL {
            let Some(rubric) = self.agents.get(&agent) else {
                problems.push(format!("agent '{}' has no weights", agent));
                continue;
            };

            if !rubric.weight.is_finite() || rubric.weight < 0.0 {
                problems.push(format!("agent '{}' weight must be non-negative", agent));
            }

            for category in agent.categories() {
                if !rubric.categories.contains_key(*category) {
                    problems.push(format!("{}.{} has no weight", agent, category));
                }
            }
            for (category, weight) in &rubric.categories {
                if !agent.declares(category) {
                    problems.push(format!("{}.{} is not a category of {}", agent, category, agent));
                }
                if !weight.is_finite() || *weight < 0.0 {
                    problems.push(format!("{}.{} weight must be non-negative", agent, category));
                }
            }

            let category_sum: f64 = rubric.categories.values().sum();
            if (category_sum - WEIGHT_TOTAL).abs() > WEIGHT_TOLERANCE {
                problems.push(format!(
                    "{} category weights sum to {}, expected {}",
                    agent, category_sum, WEIGHT_TOTAL
                ));
            }
        }

        let agent_sum: f64 = self.agents.values().map(|r| r.weight).sum();
        if (agent_sum - WEIGHT_TOTAL).abs() > WEIGHT_TOLERANCE {
            problems.push(format!(
                "agent weights sum to {}, expected {}",
                agent_sum, WEIGHT_TOTAL
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RubricError::Invalid(problems))
        }
    }
}
