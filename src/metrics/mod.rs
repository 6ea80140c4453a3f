//! Prometheus metrics for evaluation runs.
//!
//! # Example
//!
//! ```ignore
//! use hack_judge::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.submission_finished("completed", 42.0);
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{InProgressGuard, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    AGENT_ATTEMPTS, AGENT_OUTCOMES_TOTAL, COST_RECORD_FAILURES, LLM_COST_USD, LLM_TOKENS_TOTAL,
    REGISTRY, SUBMISSIONS_IN_PROGRESS, SUBMISSIONS_TOTAL, SUBMISSION_DURATION,
};
