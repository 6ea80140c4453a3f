//! Weighted score aggregation and leaderboard ordering.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rubric::{MissingAgentPolicy, RubricWeights, WEIGHT_TOTAL};
use crate::agents::AgentIdentity;

/// How a submission's total was assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Weighted total on a 0-100 scale.
    pub total: f64,
    /// Per-agent score (0-100) of the agents that contributed.
    pub agent_scores: BTreeMap<AgentIdentity, f64>,
    /// Agents with no score.
    pub missing_agents: Vec<AgentIdentity>,
    pub policy: MissingAgentPolicy,
}

/// Score of one agent: `sum(score[c] * weight[c]) / 100`.
///
/// Categories without a weight contribute nothing.
pub fn agent_score(
    identity: AgentIdentity,
    scores: &BTreeMap<String, f64>,
    rubric: &RubricWeights,
) -> f64 {
    let Some(agent_rubric) = rubric.agent(identity) else {
        return 0.0;
    };
    scores
        .iter()
        .map(|(category, score)| {
            score * agent_rubric.categories.get(category).copied().unwrap_or(0.0)
        })
        .sum::<f64>()
        / WEIGHT_TOTAL
}

/// Combine the scores of the agents that succeeded.
///
/// Returns `None` when no agent succeeded.
pub fn aggregate<'a>(
    successes: impl IntoIterator<Item = (AgentIdentity, &'a BTreeMap<String, f64>)>,
    rubric: &RubricWeights,
) -> Option<ScoreBreakdown> {
    let agent_scores: BTreeMap<AgentIdentity, f64> = successes
        .into_iter()
        .map(|(identity, scores)| (identity, agent_score(identity, scores, rubric)))
        .collect();

    if agent_scores.is_empty() {
        return None;
    }

    let weight_of = |identity: &AgentIdentity| rubric.agent(*identity).map_or(0.0, |r| r.weight);
    let weighted: f64 = agent_scores
        .iter()
        .map(|(identity, score)| score * weight_of(identity))
        .sum();

    let total = match rubric.missing_agent_policy {
        MissingAgentPolicy::Renormalize => {
            let present_weight: f64 = agent_scores.keys().map(weight_of).sum();
            if present_weight > 0.0 {
                weighted / present_weight
            } else {
                0.0
            }
        }
        MissingAgentPolicy::ZeroFill => weighted / WEIGHT_TOTAL,
    };

    let missing_agents = AgentIdentity::ALL
        .into_iter()
        .filter(|agent| !agent_scores.contains_key(agent))
        .collect();

    Some(ScoreBreakdown {
        total,
        agent_scores,
        missing_agents,
        policy: rubric.missing_agent_policy,
    })
}

/// A submission competing for a leaderboard position.
#[derive(Debug, Clone, PartialEq)]
pub struct RankCandidate {
    pub submission_id: String,
    pub submitted_at: DateTime<Utc>,
    pub score: Option<f64>,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub submission_id: String,
    pub score: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Rank scored submissions: highest score first, then earliest submission,
/// then submission id. Unscored submissions are left out.
pub fn leaderboard(candidates: impl IntoIterator<Item = RankCandidate>) -> Vec<LeaderboardEntry> {
    let mut scored: Vec<(f64, RankCandidate)> = candidates
        .into_iter()
        .filter_map(|c| c.score.map(|score| (score, c)))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.submission_id.cmp(&b.submission_id))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(idx, (score, c))| LeaderboardEntry {
            rank: idx + 1,
            submission_id: c.submission_id,
            score,
            submitted_at: c.submitted_at,
        })
        .collect()
}
