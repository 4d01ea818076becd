//! Hand-written fakes shared by this crate's tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dispatch::{
    BackendDescriptor, BackendError, BackendId, BackendRegistry, BackendTable, CancelRequest,
    ComputeBackend, CredentialBroker, DeliveryGuid, DeliveryId, DeliveryLog, DeliveryRecord,
    DispatchRequest, ExecutionName, ExecutionStore, IdleWatchMessage, IdleWatchQueue,
    InstallationId, JobId, JobRequest, LabelSet, Owner, ProviderError, QueueError,
    RegistrationScope, RegistrationToken, RepositoryName, Selection, Session, Timestamp,
    WorkerHandle, WorkerId,
};

use crate::clock::Clock;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::store::MemoryExecutionStore;

pub fn t0() -> Timestamp {
    Timestamp::from_unix_seconds(1_700_000_000).unwrap()
}

pub fn job_request(job_id: u64) -> JobRequest {
    JobRequest {
        owner: Owner::new("acme").unwrap(),
        repository: RepositoryName::new("svc").unwrap(),
        job_id: JobId::new(job_id),
        job_url: format!("https://github.com/acme/svc/actions/runs/1/job/{job_id}"),
        installation: InstallationId::new(7),
        labels: LabelSet::from_strs(["self-hosted", "linux"]),
        deployment: None,
        run_id: None,
        head_branch: None,
    }
}

pub fn selection(backend: &str) -> Selection {
    Selection {
        backend: BackendId::new(backend).unwrap(),
        labels: LabelSet::from_strs(["linux"]),
    }
}

pub fn table(backend: &str) -> BackendTable {
    BackendTable::new(vec![BackendDescriptor::new(
        BackendId::new(backend).unwrap(),
        LabelSet::from_strs(["linux"]),
    )])
    .unwrap()
}

pub fn idle_worker(name: &ExecutionName, started_at: Timestamp) -> WorkerHandle {
    WorkerHandle {
        id: WorkerId::new(99),
        name: name.clone(),
        busy: false,
        started_at: Some(started_at),
        labels: LabelSet::from_strs(["linux"]),
    }
}

// ---------------------------------------------------------------------------

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<Timestamp>);

impl ManualClock {
    pub fn new(at: Timestamp) -> Self {
        Self(Mutex::new(at))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now = now.plus(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.0.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBroker {
    pub workers: Mutex<HashMap<ExecutionName, WorkerHandle>>,
    pub token_errors: Mutex<VecDeque<ProviderError>>,
    pub delete_errors: Mutex<VecDeque<ProviderError>>,
    pub tokens_issued: Mutex<u32>,
    pub deleted: Mutex<Vec<ExecutionName>>,
    pub cancelled_jobs: Mutex<Vec<JobId>>,
    pub scopes: Mutex<Vec<RegistrationScope>>,
}

impl FakeBroker {
    pub fn register(&self, worker: WorkerHandle) {
        self.workers
            .lock()
            .unwrap()
            .insert(worker.name.clone(), worker);
    }

    pub fn fail_tokens(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.token_errors.lock().unwrap().extend(errors);
    }

    pub fn fail_deletes(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.delete_errors.lock().unwrap().extend(errors);
    }

    pub fn deleted(&self) -> Vec<ExecutionName> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn cancelled_jobs(&self) -> Vec<JobId> {
        self.cancelled_jobs.lock().unwrap().clone()
    }

    pub fn tokens_issued(&self) -> u32 {
        *self.tokens_issued.lock().unwrap()
    }
}

#[async_trait]
impl CredentialBroker for FakeBroker {
    async fn authenticate(&self, identity: InstallationId) -> Result<Session, ProviderError> {
        Ok(Session::new(identity, "session-token".to_string().into(), None))
    }

    async fn issue_registration_token(
        &self,
        _session: &Session,
        scope: &RegistrationScope,
    ) -> Result<RegistrationToken, ProviderError> {
        self.scopes.lock().unwrap().push(scope.clone());
        if let Some(err) = self.token_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        *self.tokens_issued.lock().unwrap() += 1;
        Ok(RegistrationToken::new("registration-token"))
    }

    async fn cancel_job(
        &self,
        _session: &Session,
        _owner: &Owner,
        _repo: &RepositoryName,
        job_id: JobId,
    ) -> Result<(), ProviderError> {
        self.cancelled_jobs.lock().unwrap().push(job_id);
        Ok(())
    }

    async fn find_worker(
        &self,
        _session: &Session,
        _scope: &RegistrationScope,
        name: &ExecutionName,
    ) -> Result<Option<WorkerHandle>, ProviderError> {
        Ok(self.workers.lock().unwrap().get(name).cloned())
    }

    async fn delete_worker(
        &self,
        _session: &Session,
        _scope: &RegistrationScope,
        worker: &WorkerHandle,
    ) -> Result<(), ProviderError> {
        if let Some(err) = self.delete_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.workers.lock().unwrap().remove(&worker.name).is_some() {
            self.deleted.lock().unwrap().push(worker.name.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// Backend returning scripted outcomes; `Ok(())` once the script runs out.
#[derive(Default)]
pub struct FakeBackend {
    pub outcomes: Mutex<VecDeque<Result<(), BackendError>>>,
    pub requests: Mutex<Vec<DispatchRequest>>,
    /// When set, every dispatch writes an idle cancellation into this store
    /// before returning, as the idle watch would while the worker runs.
    pub cancel_via: Mutex<Option<Arc<dyn ExecutionStore>>>,
}

impl FakeBackend {
    pub fn script(&self, outcomes: impl IntoIterator<Item = Result<(), BackendError>>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn dispatched(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<DispatchRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ComputeBackend for FakeBackend {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        let store = self.cancel_via.lock().unwrap().clone();
        if let Some(store) = store {
            let cancel = CancelRequest {
                reason: "idle".to_string(),
                requested_at: t0(),
            };
            store
                .request_cancel(&request.execution_name, cancel)
                .await
                .unwrap();
        }
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub fn backend_failure(backend: &str, retryable: bool) -> BackendError {
    BackendError::Failed {
        backend: BackendId::new(backend).unwrap(),
        message: "worker exited with status 1".to_string(),
        retryable,
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeQueue {
    pub messages: Mutex<Vec<(IdleWatchMessage, Duration)>>,
    pub closed: Mutex<bool>,
}

impl FakeQueue {
    pub fn messages(&self) -> Vec<(IdleWatchMessage, Duration)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdleWatchQueue for FakeQueue {
    async fn enqueue(&self, message: IdleWatchMessage, delay: Duration) -> Result<(), QueueError> {
        if *self.closed.lock().unwrap() {
            return Err(QueueError::Closed);
        }
        self.messages.lock().unwrap().push((message, delay));
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDeliveryLog {
    pub deliveries: Mutex<Vec<DeliveryRecord>>,
    pub redelivered: Mutex<Vec<DeliveryId>>,
    pub fail_redeliver: Mutex<bool>,
}

impl FakeDeliveryLog {
    pub fn push(&self, id: u64, guid: &str, succeeded: bool, redelivery: bool, at: Timestamp) {
        self.deliveries.lock().unwrap().push(DeliveryRecord {
            id: DeliveryId::new(id),
            guid: DeliveryGuid::new(guid).unwrap(),
            succeeded,
            redelivery,
            delivered_at: at,
            event: "workflow_job".to_string(),
        });
    }

    pub fn redelivered(&self) -> Vec<DeliveryId> {
        self.redelivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryLog for FakeDeliveryLog {
    async fn list_since(
        &self,
        after: Option<DeliveryId>,
        not_before: Timestamp,
    ) -> Result<Vec<DeliveryRecord>, ProviderError> {
        Ok(self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| after.is_none_or(|after| d.id > after))
            .filter(|d| d.delivered_at >= not_before)
            .cloned()
            .collect())
    }

    async fn redeliver(&self, id: DeliveryId) -> Result<(), ProviderError> {
        if *self.fail_redeliver.lock().unwrap() {
            return Err(ProviderError::Unavailable {
                message: "hook endpoint down".to_string(),
            });
        }
        self.redelivered.lock().unwrap().push(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// An orchestrator wired to fakes, with handles to each of them.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryExecutionStore>,
    pub broker: Arc<FakeBroker>,
    pub backend: Arc<FakeBackend>,
    pub queue: Arc<FakeQueue>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: OrchestratorConfig) -> Self {
        let store = Arc::new(MemoryExecutionStore::new());
        let broker = Arc::new(FakeBroker::default());
        let backend = Arc::new(FakeBackend::default());
        let queue = Arc::new(FakeQueue::default());
        let clock = Arc::new(ManualClock::new(t0()));

        let mut registry = BackendRegistry::new();
        registry.register(BackendId::new("pool").unwrap(), backend.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            config,
            &table("pool"),
            store.clone(),
            broker.clone(),
            registry,
            queue.clone(),
            clock.clone(),
        ));
        Self {
            orchestrator,
            store,
            broker,
            backend,
            queue,
            clock,
        }
    }
}
