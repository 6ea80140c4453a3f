//! Metric recording helpers for evaluation runs.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics so call sites use
//! canonical label values. Every method is a no-op until `init_metrics()`
//! has been called, so library users and tests need not initialize metrics.

use prometheus::Gauge;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::prometheus::{
    AGENT_ATTEMPTS, AGENT_OUTCOMES_TOTAL, COST_RECORD_FAILURES, LLM_COST_USD, LLM_TOKENS_TOTAL,
    SUBMISSIONS_IN_PROGRESS, SUBMISSIONS_TOTAL, SUBMISSION_DURATION,
};
use crate::agents::AgentName;
use crate::llm::TokenUsage;

/// Metrics collector for recording hack-judge operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record how one agent run ended.
    ///
    /// `attempts` is observed only when known (schema attempts are not
    /// counted for provider failures).
    pub fn record_agent_outcome(&self, agent: AgentName, outcome: &str, attempts: Option<u32>) {
        if let Some(outcomes) = AGENT_OUTCOMES_TOTAL.get() {
            outcomes
                .with_label_values(&[agent.as_str(), outcome])
                .inc();
        }

        if let (Some(histogram), Some(attempts)) = (AGENT_ATTEMPTS.get(), attempts) {
            histogram
                .with_label_values(&[agent.as_str()])
                .observe(f64::from(attempts));
        }

        tracing::trace!(agent = %agent, outcome, ?attempts, "Recorded agent outcome");
    }

    /// Record tokens spent on a model.
    pub fn record_usage(&self, model: &str, usage: TokenUsage) {
        if let Some(tokens) = LLM_TOKENS_TOTAL.get() {
            tokens
                .with_label_values(&[model, "input"])
                .inc_by(usage.input_tokens as f64);
            tokens
                .with_label_values(&[model, "output"])
                .inc_by(usage.output_tokens as f64);
        }
    }

    /// Record a persisted cost.
    pub fn record_cost(&self, model: &str, cost_usd: Decimal) {
        if let Some(cost) = LLM_COST_USD.get() {
            cost.with_label_values(&[model])
                .inc_by(cost_usd.to_f64().unwrap_or(0.0));
        }
    }

    /// Record a cost record that was not written.
    pub fn record_cost_failure(&self, agent: AgentName, reason: &str) {
        if let Some(failures) = COST_RECORD_FAILURES.get() {
            failures.with_label_values(&[agent.as_str(), reason]).inc();
        }
    }

    /// Mark a submission as started. It stays in progress until the guard
    /// drops, including when the evaluation unwinds.
    #[must_use]
    pub fn submission_started(&self) -> InProgressGuard {
        InProgressGuard::track(SUBMISSIONS_IN_PROGRESS.get().cloned())
    }

    /// Record a finished submission.
    pub fn submission_finished(&self, status: &str, duration_secs: f64) {
        if let Some(total) = SUBMISSIONS_TOTAL.get() {
            total.with_label_values(&[status]).inc();
        }
        if let Some(duration) = SUBMISSION_DURATION.get() {
            duration.observe(duration_secs);
        }

        tracing::trace!(status, duration_secs, "Recorded submission metric");
    }
}

/// Holds one unit of an in-progress gauge.
#[derive(Debug)]
pub struct InProgressGuard {
    gauge: Option<Gauge>,
}

impl InProgressGuard {
    fn track(gauge: Option<Gauge>) -> Self {
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        Self { gauge }
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        if let Some(gauge) = &self.gauge {
            gauge.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentIdentity;
    use crate::metrics::prometheus::init_metrics;

    #[test]
    fn test_recording_before_init_is_noop() {
        let collector = MetricsCollector::new();
        collector.record_agent_outcome(AgentIdentity::BugHunter.name(), "success", Some(1));
        collector.record_usage("m", TokenUsage::new(1, 2));
    }

    #[test]
    fn test_recorded_values_are_exported() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_agent_outcome(AgentIdentity::InnovationScorer.name(), "success", Some(2));
        collector.record_cost_failure(AgentIdentity::InnovationScorer.name(), "persistence_failed");
        drop(collector.submission_started());
        collector.submission_finished("partial", 12.0);

        let exported = crate::metrics::export_metrics();
        assert!(exported.contains("hack_judge_agent_outcomes_total"));
        assert!(exported.contains("agent=\"innovation_scorer\""));
        assert!(exported.contains("hack_judge_cost_record_failures_total"));
        assert!(exported.contains("status=\"partial\""));
    }

    #[test]
    fn test_in_progress_released_on_unwind() {
        let gauge = Gauge::new("test_submissions_in_progress", "test gauge").expect("valid gauge");

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = InProgressGuard::track(Some(gauge.clone()));
            assert_eq!(gauge.get(), 1.0);
            panic!("evaluation blew up");
        }));

        assert!(unwound.is_err());
        assert_eq!(gauge.get(), 0.0);
    }
}
