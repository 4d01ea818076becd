//! Execution records: the persisted state of one job's lifecycle workflow.
//!
//! An [`ExecutionRecord`] is the single source of truth shared by the
//! orchestrator driver and the idle watch. The driver advances it step by step
//! and persists it after every transition; the idle watch only ever reads its
//! status and writes a cancellation request into it.

use serde::{Deserialize, Serialize};

use crate::errors::RetryPolicy;
use crate::{ExecutionName, JobId, JobRequest, Owner, RepositoryName, Selection, Timestamp};

/// Maximum length of an execution name. Execution names double as worker
/// registration names, which the provider caps at 64 characters.
pub const MAX_EXECUTION_NAME_LEN: usize = 64;

/// Derives the deterministic execution name for a job.
///
/// Attempt 1 is the bare `owner-repo-job` name; later attempts append `-n`.
/// Characters outside `[A-Za-z0-9_-]` become `-`, and the `owner-repo` prefix
/// is truncated so the job id and attempt suffix always survive.
pub fn execution_name(
    owner: &Owner,
    repository: &RepositoryName,
    job_id: JobId,
    attempt: u32,
) -> ExecutionName {
    let tail = if attempt > 1 {
        format!("-{job_id}-{attempt}")
    } else {
        format!("-{job_id}")
    };
    let prefix: String = format!("{owner}-{repository}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_EXECUTION_NAME_LEN.saturating_sub(tail.len()))
        .collect();

    ExecutionName::from_nonempty(format!("{prefix}{tail}"))
}

// ---------------------------------------------------------------------------

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The workflow is still in progress (possibly waiting between attempts).
    Running,
    /// The worker ran and the backend reported success.
    Succeeded,
    /// Every attempt failed, or a non-retryable error occurred.
    Failed,
    /// The workflow was cooperatively cancelled.
    Aborted,
}

impl ExecutionStatus {
    /// Returns `true` for every status except [`ExecutionStatus::Running`].
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// The step the driver will perform next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Fetch a fresh registration token.
    TokenFetch,
    /// Hand the worker to the backend and await its outcome.
    Dispatch,
    /// Remove the worker registration after a failed attempt.
    Cleanup,
    /// Nothing left to do.
    Done,
}

/// What the driver does once cleanup has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterCleanup {
    /// Schedule another attempt under the retry envelope.
    Retry,
    /// Cancel the job upstream and conclude as [`ExecutionStatus::Failed`].
    Fail,
    /// Conclude as [`ExecutionStatus::Aborted`].
    Abort,
}

/// Progress of the cleanup step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupState {
    /// Delete attempts that found the worker busy.
    pub busy_attempts: u32,
    /// Decided when the attempt failed, before cleanup started.
    pub then: AfterCleanup,
}

/// The error that caused an attempt to fail, preserved for diagnostics and
/// re-raised after cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Human-readable error text.
    pub message: String,
    /// Retry classification at the time of failure.
    pub policy: RetryPolicy,
}

/// A cooperative cancellation request written by the idle watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Why cancellation was requested (e.g. `"idle"`).
    pub reason: String,
    /// When it was requested.
    pub requested_at: Timestamp,
}

// ---------------------------------------------------------------------------

/// The persisted state of one job's lifecycle workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Deterministic name; also the worker's registration name.
    pub name: ExecutionName,
    /// Which attempt suffix this record was started under (1-based).
    pub start_attempt: u32,
    /// The job being served.
    pub request: JobRequest,
    /// The backend decision, fixed for the record's lifetime.
    pub selection: Selection,
    /// Overall status.
    pub status: ExecutionStatus,
    /// Next step to perform.
    pub step: WorkflowStep,
    /// Retries already scheduled under the retry envelope.
    pub retries: u32,
    /// The driver must not advance before this instant.
    pub not_before: Option<Timestamp>,
    /// Cleanup progress, while in [`WorkflowStep::Cleanup`].
    pub cleanup: Option<CleanupState>,
    /// Pending cooperative cancellation.
    pub cancel: Option<CancelRequest>,
    /// Most recent attempt failure.
    pub last_error: Option<ErrorRecord>,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When the record last changed.
    pub updated_at: Timestamp,
}

impl ExecutionRecord {
    /// Creates a fresh, running record positioned at [`WorkflowStep::TokenFetch`].
    pub fn new(
        name: ExecutionName,
        start_attempt: u32,
        request: JobRequest,
        selection: Selection,
        now: Timestamp,
    ) -> Self {
        Self {
            name,
            start_attempt,
            request,
            selection,
            status: ExecutionStatus::Running,
            step: WorkflowStep::TokenFetch,
            retries: 0,
            not_before: None,
            cleanup: None,
            cancel: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` once the record has concluded.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns `true` if the driver may advance the record at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }

    /// Concludes the record with `status`.
    pub fn conclude(&mut self, status: ExecutionStatus, now: Timestamp) {
        self.status = status;
        self.step = WorkflowStep::Done;
        self.not_before = None;
        self.cleanup = None;
        self.updated_at = now;
    }

    /// Moves to `step`, clearing any wait.
    pub fn enter(&mut self, step: WorkflowStep, now: Timestamp) {
        self.step = step;
        self.not_before = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
