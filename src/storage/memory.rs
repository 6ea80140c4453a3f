//! Process-local cost store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CostStore, CostSummary, StoreError};
use crate::agents::AgentName;
use crate::llm::cost::CostRecord;

/// In-memory [`CostStore`], keyed by `(submission_id, agent_name)`.
#[derive(Debug, Default)]
pub struct InMemoryCostStore {
    records: RwLock<BTreeMap<(String, AgentName), CostRecord>>,
}

impl InMemoryCostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored records, ordered by key.
    pub fn records(&self) -> Vec<CostRecord> {
        match self.records.read() {
            Ok(records) => records.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CostStore for InMemoryCostStore {
    async fn put(&self, record: &CostRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Unavailable("cost store lock poisoned".to_string()))?;
        records
            .entry((record.submission_id.clone(), record.agent_name))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn aggregate(&self, hackathon_id: &str) -> Result<CostSummary, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Unavailable("cost store lock poisoned".to_string()))?;
        Ok(CostSummary::from_records(
            hackathon_id,
            records.values().filter(|r| r.hackathon_id == hackathon_id),
        ))
    }
}
