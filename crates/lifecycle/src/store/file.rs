use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use dispatch::{
    CancelOutcome, CancelRequest, CreateOutcome, ExecutionName, ExecutionRecord, ExecutionStore,
    StoreError,
};

use super::{apply_cancel, merge_put, most_recent};

const RECORD_EXTENSION: &str = "json";

/// Execution store that keeps one JSON file per record in a directory.
///
/// All records are loaded into memory when the store is opened; every write
/// goes to disk before the in-memory copy is updated, so a restart resumes
/// from the last persisted transition. Execution names are restricted to
/// `[A-Za-z0-9_-]` and are used as file names directly.
#[derive(Debug)]
pub struct FileExecutionStore {
    dir: PathBuf,
    records: Mutex<HashMap<ExecutionName, ExecutionRecord>>,
}

impl FileExecutionStore {
    /// Opens (creating if necessary) the store rooted at `dir`.
    ///
    /// Files that cannot be parsed are skipped with a warning rather than
    /// failing startup.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error(&dir, e))?;

        let mut records = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| storage_error(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path).await {
                Ok(record) => {
                    records.insert(record.name.clone(), record);
                }
                Err(err) => warn!(
                    path = %path.display(),
                    error = %err,
                    "Skipping unreadable execution record"
                ),
            }
        }

        debug!(dir = %dir.display(), records = records.len(), "Opened file execution store");
        Ok(Self {
            dir,
            records: Mutex::new(records),
        })
    }

    fn path_for(&self, name: &ExecutionName) -> PathBuf {
        self.dir.join(format!("{name}.{RECORD_EXTENSION}"))
    }

    async fn persist(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.name);
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Storage {
            message: format!("cannot encode execution '{}': {e}", record.name),
        })?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error(&path, e))
    }
}

#[async_trait]
impl ExecutionStore for FileExecutionStore {
    async fn create_if_absent(&self, record: ExecutionRecord) -> Result<CreateOutcome, StoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&record.name) {
            return Ok(CreateOutcome::Exists(Box::new(existing.clone())));
        }
        self.persist(&record).await?;
        records.insert(record.name.clone(), record);
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, name: &ExecutionName) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.records.lock().await.get(name).cloned())
    }

    async fn put(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let Some(stored) = records.get(&record.name) else {
            return Err(StoreError::NotFound { name: record.name });
        };
        let merged = merge_put(Some(stored), record);
        self.persist(&merged).await?;
        records.insert(merged.name.clone(), merged);
        Ok(())
    }

    async fn request_cancel(
        &self,
        name: &ExecutionName,
        request: CancelRequest,
    ) -> Result<CancelOutcome, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get(name) else {
            return Ok(CancelOutcome::NotFound);
        };
        let mut updated = record.clone();
        let outcome = apply_cancel(Some(&mut updated), request);
        if outcome == CancelOutcome::Requested && updated != *record {
            self.persist(&updated).await?;
            records.insert(name.clone(), updated);
        }
        Ok(outcome)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.lock().await.values().cloned().collect();
        Ok(most_recent(records, limit))
    }

    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect())
    }
}

async fn read_record(path: &Path) -> Result<ExecutionRecord, StoreError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| storage_error(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Storage {
        message: format!("cannot decode {}: {e}", path.display()),
    })
}

fn storage_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Storage {
        message: format!("{}: {err}", path.display()),
    }
}
