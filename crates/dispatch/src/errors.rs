//! Error taxonomy and retry-policy types for the dispatch domain.
//!
//! [`DispatchError`] covers conditions surfaced by the domain's own operations
//! (configuration, selection, idempotent start). Errors returned through the
//! port traits are defined here too, because the orchestrator classifies them:
//! every error that participates in retry decisions can produce a
//! [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BackendId, ExecutionName, JobId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the orchestrator decide
/// whether to re-run an attempt or fail the execution.
///
/// - `Retryable` errors: API timeouts, transient rate limits, backend capacity.
/// - `NonRetryable` errors: bad credentials, invalid configuration, rejected requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Errors returned by the source-control provider ports (credential broker,
/// deployment gate, delivery log).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The credentials were rejected.
    #[error("Authentication rejected for identity {identity}: {message}")]
    Unauthorized {
        /// Identity that failed to authenticate.
        identity: String,
        /// Provider message.
        message: String,
    },

    /// The worker is running a job and cannot be deregistered yet.
    #[error("Worker '{name}' is busy")]
    WorkerBusy {
        /// Worker registration name.
        name: String,
    },

    /// The provider throttled the request.
    #[error("Rate limited by provider")]
    RateLimited {
        /// Delay requested by the provider, if any.
        retry_after: Option<Duration>,
    },

    /// A request was rejected as invalid.
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// The provider failed or could not be reached.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The adapter is not configured for the requested operation.
    #[error("Provider misconfigured: {message}")]
    Misconfigured {
        /// Description of the problem.
        message: String,
    },
}

impl ProviderError {
    /// Classifies the error for retry purposes.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ProviderError::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            ProviderError::WorkerBusy { .. } | ProviderError::Unavailable { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            ProviderError::Unauthorized { .. }
            | ProviderError::Rejected { .. }
            | ProviderError::Misconfigured { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------

/// Errors returned by compute backends.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The worker could not be launched, or exited unsuccessfully.
    #[error("Backend '{backend}' failed: {message}")]
    Failed {
        /// Backend that failed.
        backend: BackendId,
        /// Description of the failure.
        message: String,
        /// Whether a later attempt may succeed.
        retryable: bool,
    },

    /// The worker did not finish within the backend's time limit.
    #[error("Backend '{backend}' timed out after {after:?}")]
    TimedOut {
        /// Backend that timed out.
        backend: BackendId,
        /// The limit that was exceeded.
        after: Duration,
    },

    /// No backend is registered under the selected identifier.
    #[error("No backend registered as '{backend}'")]
    Unknown {
        /// The missing identifier.
        backend: BackendId,
    },
}

impl BackendError {
    /// Classifies the error for retry purposes.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BackendError::Failed {
                retryable: true, ..
            }
            | BackendError::TimedOut { .. } => RetryPolicy::Retryable { after: None },
            BackendError::Failed {
                retryable: false, ..
            }
            | BackendError::Unknown { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------

/// Errors returned by execution stores.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The record does not exist.
    #[error("Execution '{name}' not found")]
    NotFound {
        /// Missing execution name.
        name: ExecutionName,
    },

    /// The backing storage failed.
    #[error("Execution store failure: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },
}

/// Errors returned by the idle-watch queue.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueueError {
    /// The queue has been shut down.
    #[error("Idle-watch queue is closed")]
    Closed,

    /// The message could not be encoded or stored.
    #[error("Idle-watch queue failure: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

/// Errors produced while consulting the selector hook.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HookError {
    /// The hook named a backend that is not configured.
    #[error("Selector hook chose unknown backend '{backend}'")]
    UnknownBackend {
        /// The identifier the hook returned.
        backend: String,
    },

    /// The hook chose a different backend without supplying labels.
    #[error("Selector hook chose backend '{backend}' without labels")]
    EmptyLabels {
        /// The chosen backend.
        backend: BackendId,
    },

    /// The hook could not be invoked or returned an unreadable response.
    #[error("Selector hook failed: {message}")]
    Invocation {
        /// Description of the failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Domain errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the dispatch domain's own operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The configuration is invalid. Produced at load time; the service never
    /// starts with an invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The selector hook misbehaved; the intake call must fail so the sender
    /// redelivers.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// Every attempt-suffixed execution name for the job is already concluded.
    #[error("Job {job_id} exhausted {attempts} start attempts")]
    StartAttemptsExhausted {
        /// The job that could not be started.
        job_id: JobId,
        /// The configured cap.
        attempts: u32,
    },

    /// The execution store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The idle-watch queue failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A source-control provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
