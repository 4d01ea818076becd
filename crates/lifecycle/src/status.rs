//! Diagnostic summary served on the status endpoint.

use serde::Serialize;

use dispatch::{
    BackendDescriptor, BackendId, BackendTable, ExecutionName, ExecutionRecord, ExecutionStatus,
    ExecutionStore, JobId, StoreError, Timestamp, WorkflowStep,
};

/// One execution as shown on the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    /// Execution (and worker) name.
    pub name: ExecutionName,
    /// `owner/repo`.
    pub repository: String,
    /// The job being served.
    pub job_id: JobId,
    /// Browser URL of the job.
    pub job_url: String,
    /// Selected backend.
    pub backend: BackendId,
    /// Overall status.
    pub status: ExecutionStatus,
    /// Next workflow step.
    pub step: WorkflowStep,
    /// Attempt suffix the record was started under.
    pub attempt: u32,
    /// Retries scheduled so far.
    pub retries: u32,
    /// Most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Pending cancellation reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
}

impl From<&ExecutionRecord> for ExecutionSummary {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            name: record.name.clone(),
            repository: record.request.full_name(),
            job_id: record.request.job_id,
            job_url: record.request.job_url.clone(),
            backend: record.selection.backend.clone(),
            status: record.status,
            step: record.step,
            attempt: record.start_attempt,
            retries: record.retries,
            last_error: record.last_error.as_ref().map(|e| e.message.clone()),
            cancel_reason: record.cancel.as_ref().map(|c| c.reason.clone()),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Counts by status over the listed executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
}

/// The full status document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    /// When the summary was built.
    pub generated_at: Timestamp,
    /// The configured backend table, in order.
    pub backends: Vec<BackendDescriptor>,
    /// Counts over `executions`.
    pub counts: StatusCounts,
    /// Most recently updated executions first.
    pub executions: Vec<ExecutionSummary>,
}

/// Builds the status document from the `limit` most recent executions.
pub async fn summarize(
    store: &dyn ExecutionStore,
    table: &BackendTable,
    limit: usize,
    now: Timestamp,
) -> Result<StatusSummary, StoreError> {
    let records = store.list_recent(limit).await?;

    let mut counts = StatusCounts::default();
    for record in &records {
        match record.status {
            ExecutionStatus::Running => counts.running += 1,
            ExecutionStatus::Succeeded => counts.succeeded += 1,
            ExecutionStatus::Failed => counts.failed += 1,
            ExecutionStatus::Aborted => counts.aborted += 1,
        }
    }

    Ok(StatusSummary {
        generated_at: now,
        backends: table.descriptors().to_vec(),
        counts,
        executions: records.iter().map(ExecutionSummary::from).collect(),
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
