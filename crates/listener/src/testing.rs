//! Fakes and fixtures shared by this crate's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Notify;

use dispatch::{
    BackendDescriptor, BackendError, BackendId, BackendRegistry, BackendTable, ComputeBackend,
    CredentialBroker, DeploymentGate, DeploymentId, DispatchRequest, ExecutionName, HookError,
    HookInput, HookOverride, InstallationId, JobId, LabelSet, Owner, ProviderError,
    RegistrationScope, RegistrationToken, RepositoryName, SelectorHook, Session, WorkerHandle,
};
use lifecycle::{
    Clock, ExecutionHost, MemoryExecutionStore, Orchestrator, OrchestratorConfig, SystemClock,
};

use crate::intake::{Intake, IntakeConfig};
use crate::queue::DelayQueue;
use crate::signature;

pub const SECRET: &str = "secret";

pub const QUEUED: &str = r#"{
    "action": "queued",
    "workflow_job": {
        "id": 42,
        "run_id": 9,
        "html_url": "https://github.com/acme/svc/actions/runs/9/job/42",
        "labels": ["self-hosted", "Linux"],
        "head_branch": "main"
    },
    "repository": {"name": "svc", "full_name": "acme/svc", "owner": {"login": "acme"}},
    "installation": {"id": 7}
}"#;

pub fn signed(body: &str) -> String {
    signature::sign(SECRET.as_bytes(), body.as_bytes())
}

pub fn table() -> BackendTable {
    BackendTable::new(vec![
        BackendDescriptor::new(
            BackendId::new("linux-pool").unwrap(),
            LabelSet::from_strs(["linux"]),
        ),
        BackendDescriptor::new(
            BackendId::new("gpu").unwrap(),
            LabelSet::from_strs(["linux", "gpu"]),
        ),
    ])
    .unwrap()
}

// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBroker {
    pub workers: Mutex<HashMap<ExecutionName, WorkerHandle>>,
}

#[async_trait]
impl CredentialBroker for FakeBroker {
    async fn authenticate(&self, identity: InstallationId) -> Result<Session, ProviderError> {
        Ok(Session::new(identity, SecretString::from("session"), None))
    }

    async fn issue_registration_token(
        &self,
        _session: &Session,
        _scope: &RegistrationScope,
    ) -> Result<RegistrationToken, ProviderError> {
        Ok(RegistrationToken::new("registration"))
    }

    async fn cancel_job(
        &self,
        _session: &Session,
        _owner: &Owner,
        _repo: &RepositoryName,
        _job_id: JobId,
    ) -> Result<(), ProviderError> {
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
        self.workers.lock().unwrap().remove(&worker.name);
        Ok(())
    }
}

/// Backend that records requests and succeeds. While `hold` is set, each
/// dispatch waits for `release` before returning.
#[derive(Default)]
pub struct RecordingBackend {
    pub requests: Mutex<Vec<DispatchRequest>>,
    pub hold: AtomicBool,
    pub release: Notify,
}

#[async_trait]
impl ComputeBackend for RecordingBackend {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(())
    }
}

pub struct FakeGate {
    pub answer: Result<bool, ProviderError>,
    pub asked: Mutex<Vec<DeploymentId>>,
}

impl FakeGate {
    pub fn open() -> Self {
        Self::answering(Ok(false))
    }

    pub fn answering(answer: Result<bool, ProviderError>) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeploymentGate for FakeGate {
    async fn is_pending(
        &self,
        _identity: InstallationId,
        _owner: &Owner,
        _repo: &RepositoryName,
        deployment: DeploymentId,
    ) -> Result<bool, ProviderError> {
        self.asked.lock().unwrap().push(deployment);
        self.answer.clone()
    }
}

pub struct FakeHook {
    pub answer: Result<Option<HookOverride>, HookError>,
    pub inputs: Mutex<Vec<HookInput>>,
}

impl FakeHook {
    pub fn answering(answer: Result<Option<HookOverride>, HookError>) -> Self {
        Self {
            answer,
            inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SelectorHook for FakeHook {
    async fn decide(&self, input: &HookInput) -> Result<Option<HookOverride>, HookError> {
        self.inputs.lock().unwrap().push(input.clone());
        self.answer.clone()
    }
}

// ---------------------------------------------------------------------------

/// An intake filter wired to fakes.
pub struct Fixture {
    pub intake: Arc<Intake>,
    pub store: Arc<MemoryExecutionStore>,
    pub backend: Arc<RecordingBackend>,
    pub queue: Arc<DelayQueue>,
    pub clock: Arc<dyn Clock>,
}

impl Fixture {
    pub fn new(config: IntakeConfig, gate: Arc<FakeGate>, hook: Option<Arc<FakeHook>>) -> Self {
        let store = Arc::new(MemoryExecutionStore::new());
        let backend = Arc::new(RecordingBackend::default());
        let queue = Arc::new(DelayQueue::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let table = Arc::new(table());

        let mut registry = BackendRegistry::new();
        registry.register(BackendId::new("linux-pool").unwrap(), backend.clone());
        registry.register(BackendId::new("gpu").unwrap(), backend.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::default(),
            &table,
            store.clone(),
            Arc::new(FakeBroker::default()),
            registry,
            queue.clone(),
            clock.clone(),
        ));
        let host = Arc::new(ExecutionHost::new(orchestrator, clock.clone()));
        let mut intake = Intake::new(SecretString::from(SECRET), config, table, gate, host);
        if let Some(hook) = hook {
            intake = intake.with_hook(hook);
        }
        Self {
            intake: Arc::new(intake),
            store,
            backend,
            queue,
            clock,
        }
    }

    pub fn plain() -> Self {
        Self::new(IntakeConfig::default(), Arc::new(FakeGate::open()), None)
    }
}
