//! DDL for the cost store, applied through `migrations::MIGRATIONS`.

/// Priced usage per agent per submission.
pub const CREATE_COST_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cost_records (
    id BIGSERIAL PRIMARY KEY,
    hackathon_id VARCHAR(255) NOT NULL,
    submission_id VARCHAR(255) NOT NULL,
    agent_name VARCHAR(64) NOT NULL,
    model_id VARCHAR(255) NOT NULL,
    input_tokens BIGINT NOT NULL,
    output_tokens BIGINT NOT NULL,
    total_cost_usd NUMERIC(20, 6) NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT cost_records_submission_agent_key UNIQUE (submission_id, agent_name),
    CONSTRAINT cost_records_agent_name_check CHECK (
        agent_name IN ('bug_hunter', 'performance_analyzer', 'innovation_scorer', 'ai_detection')
    )
)
"#;

/// Index for per-hackathon summaries.
pub const CREATE_HACKATHON_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_cost_records_hackathon_id ON cost_records(hackathon_id)";

/// Index for per-model breakdowns.
pub const CREATE_MODEL_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_cost_records_model_id ON cost_records(model_id)";

/// Table names used by the storage layer.
pub mod tables {
    /// Cost records table name.
    pub const COST_RECORDS: &str = "cost_records";
}
