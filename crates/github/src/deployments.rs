//! [`DeploymentGate`] over the deployment statuses API.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use dispatch::{DeploymentGate, DeploymentId, InstallationId, Owner, ProviderError, RepositoryName};

use crate::client::GithubClient;

#[derive(Debug, Deserialize)]
pub(crate) struct DeploymentStatus {
    pub state: String,
}

/// States in which a deployment is still waiting on an environment gate.
const PENDING_STATES: [&str; 3] = ["waiting", "pending", "queued"];

/// Decides from the newest-first status list whether the deployment is still
/// gated. A deployment with no status yet is not considered gated.
pub(crate) fn is_gated(statuses: &[DeploymentStatus]) -> bool {
    statuses
        .first()
        .is_some_and(|latest| PENDING_STATES.contains(&latest.state.as_str()))
}

#[async_trait]
impl DeploymentGate for GithubClient {
    async fn is_pending(
        &self,
        identity: InstallationId,
        owner: &Owner,
        repo: &RepositoryName,
        deployment: DeploymentId,
    ) -> Result<bool, ProviderError> {
        let session = match self.session(identity).await {
            Ok(session) => session,
            Err(err) => return Err(self.provider_error(identity, err).await),
        };
        let path = format!("/repos/{owner}/{repo}/deployments/{deployment}/statuses");
        let request = self
            .request(Method::GET, &path, session.token())
            .query(&[("per_page", "1")]);
        match self.send_json::<Vec<DeploymentStatus>>(request).await {
            Ok(statuses) => {
                let gated = is_gated(&statuses);
                debug!(deployment = %deployment, gated, "Deployment gate checked");
                Ok(gated)
            }
            Err(err) => Err(self.provider_error(identity, err).await),
        }
    }
}

#[cfg(test)]
#[path = "deployments_tests.rs"]
mod tests;
