//! Versioned schema steps for the cost store.
//!
//! Steps are applied in order and recorded by name in `judge_schema_history`.
//! Startup runs them every time; recorded steps are skipped.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::schema;

/// A named schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Every step in application order. Names are permanent once shipped.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_cost_records",
        sql: schema::CREATE_COST_RECORDS_TABLE,
    },
    Migration {
        name: "0002_index_cost_records_hackathon",
        sql: schema::CREATE_HACKATHON_INDEX,
    },
    Migration {
        name: "0003_index_cost_records_model",
        sql: schema::CREATE_MODEL_INDEX,
    },
];

const CREATE_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS judge_schema_history (
    name VARCHAR(128) PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema step {name} failed: {source}")]
    StepFailed {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// A step recorded in the history table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies [`MIGRATIONS`] against a pool.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply every step missing from the history. Returns how many ran.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        let done: HashSet<String> = self
            .applied()
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();

        let pending = pending_steps(MIGRATIONS, &done);
        for step in &pending {
            self.apply(step).await?;
            info!(step = step.name, "Applied schema step");
        }
        Ok(pending.len())
    }

    /// Steps already recorded, oldest first.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        sqlx::query(CREATE_HISTORY_TABLE).execute(&self.pool).await?;
        let rows = sqlx::query_as(
            "SELECT name, applied_at FROM judge_schema_history ORDER BY applied_at, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn apply(&self, step: &Migration) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(step.sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::StepFailed {
                name: step.name,
                source,
            })?;
        sqlx::query("INSERT INTO judge_schema_history (name) VALUES ($1)")
            .bind(step.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn pending_steps(steps: &[Migration], done: &HashSet<String>) -> Vec<Migration> {
    steps
        .iter()
        .filter(|step| !done.contains(step.name))
        .copied()
        .collect()
}
