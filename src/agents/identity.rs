//! Agent identities and their canonical names.
//!
//! Every agent has exactly one string projection (`bug_hunter`, ...). The
//! projection is the only form that may appear in logs, metrics labels,
//! serialized results and storage keys. [`AgentName`] is the type used at
//! those boundaries: it can only be built from an [`AgentIdentity`] or parsed
//! from a canonical string, so no other representation can reach a key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The fixed set of scoring agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentIdentity {
    /// Looks for defects, security problems and error handling gaps.
    BugHunter,
    /// Looks for inefficient algorithms, scalability limits and resource waste.
    PerformanceAnalyzer,
    /// Judges novelty, technical depth and potential impact.
    InnovationScorer,
    /// Estimates how much of the submission was machine generated.
    #[serde(rename = "ai_detection")]
    AIDetection,
}

impl AgentIdentity {
    /// All agents, in canonical order.
    pub const ALL: [AgentIdentity; 4] = [
        AgentIdentity::BugHunter,
        AgentIdentity::PerformanceAnalyzer,
        AgentIdentity::InnovationScorer,
        AgentIdentity::AIDetection,
    ];

    /// The canonical string projection.
    pub const fn as_str(self) -> &'static str {
        match self {
            AgentIdentity::BugHunter => "bug_hunter",
            AgentIdentity::PerformanceAnalyzer => "performance_analyzer",
            AgentIdentity::InnovationScorer => "innovation_scorer",
            AgentIdentity::AIDetection => "ai_detection",
        }
    }

    /// Score categories this agent must report, in prompt order.
    pub const fn categories(self) -> &'static [&'static str] {
        match self {
            AgentIdentity::BugHunter => {
                &["security", "error_handling", "correctness", "code_quality"]
            }
            AgentIdentity::PerformanceAnalyzer => &["efficiency", "scalability", "resource_usage"],
            AgentIdentity::InnovationScorer => &["novelty", "technical_depth", "impact"],
            AgentIdentity::AIDetection => {
                &["originality", "commit_authenticity", "human_authorship"]
            }
        }
    }

    /// Whether `category` is one of this agent's declared categories.
    pub fn declares(self, category: &str) -> bool {
        self.categories().contains(&category)
    }

    /// Canonical name for use at serialization and storage boundaries.
    pub fn name(self) -> AgentName {
        AgentName(self)
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a canonical agent name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown agent '{0}': expected one of bug_hunter, performance_analyzer, innovation_scorer, ai_detection")]
pub struct UnknownAgent(pub String);

impl FromStr for AgentIdentity {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentIdentity::ALL
            .into_iter()
            .find(|agent| agent.as_str() == s)
            .ok_or_else(|| UnknownAgent(s.to_string()))
    }
}

/// Canonical agent name used in persisted records and storage keys.
///
/// Serializes as the bare canonical string and exposes no other view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentName(AgentIdentity);

impl AgentName {
    /// The canonical string.
    pub fn as_str(&self) -> &'static str {
        self.0.as_str()
    }

    /// The identity this name projects.
    pub fn identity(&self) -> AgentIdentity {
        self.0
    }
}

impl From<AgentIdentity> for AgentName {
    fn from(identity: AgentIdentity) -> Self {
        AgentName(identity)
    }
}

impl FromStr for AgentName {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AgentIdentity>().map(AgentName)
    }
}

impl AsRef<str> for AgentName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AgentName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_strings_round_trip() {
        for agent in AgentIdentity::ALL {
            let parsed: AgentIdentity = agent.as_str().parse().expect("canonical name parses");
            assert_eq!(parsed, agent);
        }
    }

    #[test]
    fn test_serde_matches_canonical_projection() {
        for agent in AgentIdentity::ALL {
            let json = serde_json::to_string(&agent).expect("serializes");
            assert_eq!(json, format!("\"{}\"", agent.as_str()));

            let name_json = serde_json::to_string(&agent.name()).expect("serializes");
            assert_eq!(name_json, json);
        }
    }

    #[test]
    fn test_debug_form_is_not_a_valid_name() {
        // The Rust-ish spelling must never be accepted as a key.
        assert!("AgentIdentity::BugHunter".parse::<AgentName>().is_err());
        assert!("BugHunter".parse::<AgentName>().is_err());
        assert!("AIDetection".parse::<AgentIdentity>().is_err());
    }

    #[test]
    fn test_agent_name_rejects_unknown_on_deserialize() {
        let result: Result<AgentName, _> = serde_json::from_str("\"style_checker\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_declared_categories() {
        assert!(AgentIdentity::BugHunter.declares("security"));
        assert!(!AgentIdentity::BugHunter.declares("novelty"));
        assert_eq!(AgentIdentity::AIDetection.categories().len(), 3);
    }

    #[test]
    fn test_display_uses_canonical_string() {
        assert_eq!(AgentIdentity::AIDetection.to_string(), "ai_detection");
        assert_eq!(AgentIdentity::PerformanceAnalyzer.name().to_string(), "performance_analyzer");
    }
}
