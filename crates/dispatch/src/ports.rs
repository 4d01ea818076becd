//! Port traits implemented by infrastructure crates.
//!
//! The orchestration layer depends only on these traits. Each one is
//! `Send + Sync` and object-safe so it can be shared as `Arc<dyn Trait>`
//! between the driver, the idle watch and the HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::delivery::DeliveryRecord;
use crate::errors::{BackendError, HookError, ProviderError, QueueError, StoreError};
use crate::execution::{CancelRequest, ExecutionRecord};
use crate::labels::LabelSet;
use crate::selector::{HookInput, HookOverride};
use crate::worker::{RegistrationScope, RegistrationToken, Session, WorkerHandle};
use crate::{
    BackendId, DeliveryId, DeploymentId, ExecutionName, IdleWatchMessage, InstallationId, JobId,
    JobRequest, Owner, RepositoryName, Timestamp,
};

// ---------------------------------------------------------------------------
// Source control
// ---------------------------------------------------------------------------

/// Authenticates against the source-control provider and manages worker
/// registrations on behalf of one identity.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Returns a live session for `identity`, reusing a cached one when valid.
    async fn authenticate(&self, identity: InstallationId) -> Result<Session, ProviderError>;

    /// Issues a fresh, short-lived worker registration token for `scope`.
    async fn issue_registration_token(
        &self,
        session: &Session,
        scope: &RegistrationScope,
    ) -> Result<RegistrationToken, ProviderError>;

    /// Cancels the job's workflow run. Best effort; callers log failures.
    async fn cancel_job(
        &self,
        session: &Session,
        owner: &Owner,
        repo: &RepositoryName,
        job_id: JobId,
    ) -> Result<(), ProviderError>;

    /// Looks a registered worker up by name.
    async fn find_worker(
        &self,
        session: &Session,
        scope: &RegistrationScope,
        name: &ExecutionName,
    ) -> Result<Option<WorkerHandle>, ProviderError>;

    /// Deletes a worker registration.
    ///
    /// A worker that is already gone counts as deleted. A worker that is
    /// running a job fails with [`ProviderError::WorkerBusy`].
    async fn delete_worker(
        &self,
        session: &Session,
        scope: &RegistrationScope,
        worker: &WorkerHandle,
    ) -> Result<(), ProviderError>;
}

/// Answers whether a deployment is still waiting on protection rules.
#[async_trait]
pub trait DeploymentGate: Send + Sync {
    /// Returns `true` while the deployment's latest status is waiting, pending
    /// or queued.
    async fn is_pending(
        &self,
        identity: InstallationId,
        owner: &Owner,
        repo: &RepositoryName,
        deployment: DeploymentId,
    ) -> Result<bool, ProviderError>;
}

/// Read and replay access to the intake channel's delivery history.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// Lists deliveries with an id greater than `after` (all, if `None`),
    /// delivered no earlier than `not_before`, in ascending id order.
    async fn list_since(
        &self,
        after: Option<DeliveryId>,
        not_before: Timestamp,
    ) -> Result<Vec<DeliveryRecord>, ProviderError>;

    /// Asks the sender to deliver `id` again.
    async fn redeliver(&self, id: DeliveryId) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

/// Everything a backend needs to start one worker.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Registration token for the worker. Never persisted.
    pub token: RegistrationToken,
    /// Worker name; equals the execution name.
    pub execution_name: ExecutionName,
    /// Registration labels, including the started-at marker.
    pub labels: LabelSet,
    /// Registration scope the token was issued for.
    pub scope: RegistrationScope,
    /// The job being served.
    pub job: JobRequest,
}

/// Runs a worker on some compute platform and awaits its completion.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Launches the worker and resolves once it has finished.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError>;
}

/// Compute backends keyed by identifier.
///
/// Built once at startup from configuration; the orchestrator resolves the
/// selected backend through it on every dispatch.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendId, Arc<dyn ComputeBackend>>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` under `id`, replacing any previous entry.
    pub fn register(&mut self, id: BackendId, backend: Arc<dyn ComputeBackend>) {
        self.backends.insert(id, backend);
    }

    /// Resolves a backend by identifier.
    pub fn get(&self, id: &BackendId) -> Result<Arc<dyn ComputeBackend>, BackendError> {
        self.backends
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::Unknown {
                backend: id.clone(),
            })
    }

    /// Returns `true` if a backend is registered under `id`.
    pub fn contains(&self, id: &BackendId) -> bool {
        self.backends.contains_key(id)
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.backends.keys().map(BackendId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("BackendRegistry").field("backends", &ids).finish()
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// External override for the default backend selection.
#[async_trait]
pub trait SelectorHook: Send + Sync {
    /// Returns `None` to accept the default selection.
    async fn decide(&self, input: &HookInput) -> Result<Option<HookOverride>, HookError>;
}

// ---------------------------------------------------------------------------
// Idle watch
// ---------------------------------------------------------------------------

/// A delay queue carrying idle-watch messages.
#[async_trait]
pub trait IdleWatchQueue: Send + Sync {
    /// Makes `message` visible to the consumer after `delay`.
    async fn enqueue(&self, message: IdleWatchMessage, delay: Duration) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// Execution store
// ---------------------------------------------------------------------------

/// Result of [`ExecutionStore::create_if_absent`].
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The record was stored.
    Created,
    /// A record with the same name already exists; it is returned unchanged.
    Exists(Box<ExecutionRecord>),
}

/// Result of [`ExecutionStore::request_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request was recorded (or was already pending).
    Requested,
    /// The record had already concluded; nothing was written.
    AlreadyTerminal,
    /// No record exists under the name.
    NotFound,
}

/// By-name storage of execution records shared by the driver and the idle watch.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Atomically stores `record` unless its name is taken.
    async fn create_if_absent(&self, record: ExecutionRecord) -> Result<CreateOutcome, StoreError>;

    /// Loads a record by name.
    async fn get(&self, name: &ExecutionName) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Replaces an existing record.
    ///
    /// A cancellation request already in the store is preserved when the
    /// incoming record carries none, so a driver writing back a record it
    /// loaded earlier cannot erase a concurrent idle-watch request.
    async fn put(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Writes a cancellation request into a non-terminal record.
    async fn request_cancel(
        &self,
        name: &ExecutionName,
        request: CancelRequest,
    ) -> Result<CancelOutcome, StoreError>;

    /// Returns up to `limit` records, most recently updated first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Returns every non-terminal record.
    async fn list_active(&self) -> Result<Vec<ExecutionRecord>, StoreError>;
}
