//! Per-job summary lifecycle. The reconciler overwrites the
//! record after each step; the store enforces last-writer-wins per
//! `summaryID`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{OrchestratorError, Result};
use crate::model::SummarySpec;

#[async_trait::async_trait]
pub trait SummaryStore: Send + Sync {
    async fn upsert(&self, summary_id: &str, spec: SummarySpec) -> Result<()>;
    async fn get(&self, summary_id: &str) -> Result<SummarySpec>;
}

#[derive(Default)]
pub struct MemorySummaryStore {
    records: RwLock<HashMap<String, SummarySpec>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn upsert(&self, summary_id: &str, spec: SummarySpec) -> Result<()> {
        let mut records = self.records.write().expect("summary store lock poisoned");
        records.insert(summary_id.to_string(), spec);
        Ok(())
    }

    async fn get(&self, summary_id: &str) -> Result<SummarySpec> {
        let records = self.records.read().expect("summary store lock poisoned");
        records
            .get(summary_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("summary '{summary_id}'")))
    }
}
