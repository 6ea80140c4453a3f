//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by hack-judge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Serializes `init_metrics` so every static comes from the same registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all hack-judge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Agent runs, labeled by agent and outcome.
pub static AGENT_OUTCOMES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Schema attempts per agent run, labeled by agent.
pub static AGENT_ATTEMPTS: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Recorded spend in USD, labeled by model.
pub static LLM_COST_USD: OnceLock<CounterVec> = OnceLock::new();

/// Cost records that could not be written, labeled by agent and reason.
pub static COST_RECORD_FAILURES: OnceLock<CounterVec> = OnceLock::new();

/// Finished submissions, labeled by status.
pub static SUBMISSIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock time per submission in seconds.
pub static SUBMISSION_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Submissions currently being evaluated.
pub static SUBMISSIONS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Calling it again is harmless: the first set of
/// metrics stays installed.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Agent metrics
    let agent_outcomes_total = CounterVec::new(
        Opts::new("hack_judge_agent_outcomes_total", "Agent runs by outcome"),
        &["agent", "outcome"],
    )?;

    let agent_attempts = HistogramVec::new(
        HistogramOpts::new(
            "hack_judge_agent_attempts",
            "Schema attempts needed per agent run",
        )
        .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0]),
        &["agent"],
    )?;

    // LLM usage metrics
    let llm_tokens_total = CounterVec::new(
        Opts::new("hack_judge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let llm_cost_usd = CounterVec::new(
        Opts::new("hack_judge_llm_cost_usd_total", "Recorded model spend in USD"),
        &["model"],
    )?;

    let cost_record_failures = CounterVec::new(
        Opts::new(
            "hack_judge_cost_record_failures_total",
            "Cost records that could not be written",
        ),
        &["agent", "reason"],
    )?;

    // Submission metrics
    let submissions_total = CounterVec::new(
        Opts::new("hack_judge_submissions_total", "Evaluated submissions by status"),
        &["status"],
    )?;

    let submission_duration = Histogram::with_opts(
        HistogramOpts::new(
            "hack_judge_submission_duration_seconds",
            "Submission evaluation time in seconds",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )?;

    let submissions_in_progress = Gauge::new(
        "hack_judge_submissions_in_progress",
        "Submissions currently being evaluated",
    )?;

    registry.register(Box::new(agent_outcomes_total.clone()))?;
    registry.register(Box::new(agent_attempts.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(llm_cost_usd.clone()))?;
    registry.register(Box::new(cost_record_failures.clone()))?;
    registry.register(Box::new(submissions_total.clone()))?;
    registry.register(Box::new(submission_duration.clone()))?;
    registry.register(Box::new(submissions_in_progress.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = AGENT_OUTCOMES_TOTAL.set(agent_outcomes_total);
    let _ = AGENT_ATTEMPTS.set(agent_attempts);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = LLM_COST_USD.set(llm_cost_usd);
    let _ = COST_RECORD_FAILURES.set(cost_record_failures);
    let _ = SUBMISSIONS_TOTAL.set(submissions_total);
    let _ = SUBMISSION_DURATION.set(submission_duration);
    let _ = SUBMISSIONS_IN_PROGRESS.set(submissions_in_progress);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
