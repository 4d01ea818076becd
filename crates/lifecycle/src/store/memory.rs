use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dispatch::{
    CancelOutcome, CancelRequest, CreateOutcome, ExecutionName, ExecutionRecord, ExecutionStore,
    StoreError,
};

use super::{apply_cancel, merge_put, most_recent};

/// Process-local execution store.
///
/// Records are lost on restart; use [`super::FileExecutionStore`] when the
/// driver must resume in-flight executions.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<ExecutionName, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create_if_absent(&self, record: ExecutionRecord) -> Result<CreateOutcome, StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.name) {
            return Ok(CreateOutcome::Exists(Box::new(existing.clone())));
        }
        records.insert(record.name.clone(), record);
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, name: &ExecutionName) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let Some(stored) = records.get(&record.name) else {
            return Err(StoreError::NotFound { name: record.name });
        };
        let merged = merge_put(Some(stored), record);
        records.insert(merged.name.clone(), merged);
        Ok(())
    }

    async fn request_cancel(
        &self,
        name: &ExecutionName,
        request: CancelRequest,
    ) -> Result<CancelOutcome, StoreError> {
        let mut records = self.records.write().await;
        Ok(apply_cancel(records.get_mut(name), request))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.read().await.values().cloned().collect();
        Ok(most_recent(records, limit))
    }

    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect())
    }
}
