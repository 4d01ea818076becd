//! Shared test fixtures.

use std::sync::Mutex;

use async_trait::async_trait;

use dispatch::{
    BackendError, BackendId, ComputeBackend, DispatchRequest, ExecutionName, InstallationId,
    JobId, JobRequest, LabelSet, Owner, RegistrationScope, RegistrationToken, RepositoryName,
};

pub fn request() -> DispatchRequest {
    let owner = Owner::new("acme").unwrap();
    let repository = RepositoryName::new("svc").unwrap();
    DispatchRequest {
        token: RegistrationToken::new("reg-token"),
        execution_name: ExecutionName::new("acme-svc-42").unwrap(),
        labels: LabelSet::from_strs(["linux", "ephemera:started:1700000000"]),
        scope: RegistrationScope::Repository {
            owner: owner.clone(),
            repo: repository.clone(),
        },
        job: JobRequest {
            owner,
            repository,
            job_id: JobId::new(42),
            job_url: "https://github.com/acme/svc/actions/runs/1/job/42".to_string(),
            installation: InstallationId::new(7),
            labels: LabelSet::from_strs(["self-hosted", "linux"]),
            deployment: None,
            run_id: None,
            head_branch: None,
        },
    }
}

/// Backend that always returns the same outcome and counts calls.
pub struct StubBackend {
    pub outcome: Result<(), BackendError>,
    pub calls: Mutex<u32>,
}

impl StubBackend {
    pub fn ok() -> Self {
        Self {
            outcome: Ok(()),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(id: &str, retryable: bool) -> Self {
        Self {
            outcome: Err(BackendError::Failed {
                backend: BackendId::new(id).unwrap(),
                message: "boom".to_string(),
                retryable,
            }),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ComputeBackend for StubBackend {
    async fn dispatch(&self, _request: &DispatchRequest) -> Result<(), BackendError> {
        *self.calls.lock().unwrap() += 1;
        self.outcome.clone()
    }
}
