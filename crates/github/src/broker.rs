//! [`CredentialBroker`] over the self-hosted runner and Actions APIs.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use dispatch::{
    parse_started_marker, CredentialBroker, ExecutionName, InstallationId, JobId, LabelSet, Owner,
    ProviderError, RegistrationScope, RegistrationToken, RepositoryName, Session, WorkerHandle,
    WorkerId,
};

use crate::auth::TokenResponse;
use crate::client::GithubClient;
use crate::errors::GithubError;

/// API path prefix under which runners of `scope` are managed.
pub(crate) fn runners_path(scope: &RegistrationScope) -> String {
    match scope {
        RegistrationScope::Repository { owner, repo } => {
            format!("/repos/{owner}/{repo}/actions/runners")
        }
        RegistrationScope::Organization { owner } => format!("/orgs/{owner}/actions/runners"),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunnerList {
    #[serde(default)]
    pub runners: Vec<Runner>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Runner {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub busy: bool,
    #[serde(default)]
    pub labels: Vec<RunnerLabel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunnerLabel {
    pub name: String,
}

impl Runner {
    pub(crate) fn into_handle(self) -> Option<WorkerHandle> {
        let name = ExecutionName::new(self.name)?;
        let started_at = parse_started_marker(self.labels.iter().map(|l| l.name.as_str()));
        Some(WorkerHandle {
            id: WorkerId::new(self.id),
            name,
            busy: self.busy,
            started_at,
            labels: LabelSet::from_strs(self.labels.iter().map(|l| &l.name)),
        })
    }
}

/// Picks the runner registered exactly as `name` from a listing.
pub(crate) fn find_by_name(list: RunnerList, name: &ExecutionName) -> Option<WorkerHandle> {
    list.runners
        .into_iter()
        .find(|r| r.name == name.as_str())
        .and_then(Runner::into_handle)
}

#[derive(Debug, Deserialize)]
struct Job {
    run_id: u64,
}

#[async_trait]
impl CredentialBroker for GithubClient {
    async fn authenticate(&self, identity: InstallationId) -> Result<Session, ProviderError> {
        match self.session(identity).await {
            Ok(session) => Ok(session),
            Err(err) => Err(self.provider_error(identity, err).await),
        }
    }

    #[instrument(skip(self, session), fields(installation = %session.identity))]
    async fn issue_registration_token(
        &self,
        session: &Session,
        scope: &RegistrationScope,
    ) -> Result<RegistrationToken, ProviderError> {
        let path = format!("{}/registration-token", runners_path(scope));
        let result: Result<TokenResponse, GithubError> = self
            .send_json(self.request(Method::POST, &path, session.token()))
            .await;
        match result {
            Ok(minted) => Ok(RegistrationToken::new(minted.token)),
            Err(err) => Err(self.provider_error(session.identity, err).await),
        }
    }

    #[instrument(skip(self, session), fields(installation = %session.identity))]
    async fn cancel_job(
        &self,
        session: &Session,
        owner: &Owner,
        repo: &RepositoryName,
        job_id: JobId,
    ) -> Result<(), ProviderError> {
        let job_path = format!("/repos/{owner}/{repo}/actions/jobs/{job_id}");
        let job: Job = match self
            .send_json(self.request(Method::GET, &job_path, session.token()))
            .await
        {
            Ok(job) => job,
            Err(err) => return Err(self.provider_error(session.identity, err).await),
        };

        let cancel_path = format!("/repos/{owner}/{repo}/actions/runs/{}/cancel", job.run_id);
        match self
            .send(self.request(Method::POST, &cancel_path, session.token()))
            .await
        {
            Ok(_) => {
                info!(run_id = job.run_id, "Workflow run cancelled");
                Ok(())
            }
            // 409: the run already completed.
            Err(err) if err.status() == Some(409) => {
                debug!(run_id = job.run_id, "Workflow run already finished");
                Ok(())
            }
            Err(err) => Err(self.provider_error(session.identity, err).await),
        }
    }

    async fn find_worker(
        &self,
        session: &Session,
        scope: &RegistrationScope,
        name: &ExecutionName,
    ) -> Result<Option<WorkerHandle>, ProviderError> {
        let request = self
            .request(Method::GET, &runners_path(scope), session.token())
            .query(&[("name", name.as_str())]);
        match self.send_json::<RunnerList>(request).await {
            Ok(list) => Ok(find_by_name(list, name)),
            Err(err) => Err(self.provider_error(session.identity, err).await),
        }
    }

    #[instrument(skip(self, session, worker), fields(worker = %worker.name))]
    async fn delete_worker(
        &self,
        session: &Session,
        scope: &RegistrationScope,
        worker: &WorkerHandle,
    ) -> Result<(), ProviderError> {
        let path = format!("{}/{}", runners_path(scope), worker.id);
        match self
            .send(self.request(Method::DELETE, &path, session.token()))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => match err.status() {
                Some(404) => {
                    debug!("Worker registration already gone");
                    Ok(())
                }
                Some(422) => Err(ProviderError::WorkerBusy {
                    name: worker.name.to_string(),
                }),
                _ => Err(self.provider_error(session.identity, err).await),
            },
        }
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
