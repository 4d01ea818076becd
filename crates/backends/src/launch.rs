//! What a launched worker needs to know, in the shapes backends hand it over.

use serde::Serialize;

use dispatch::{DispatchRequest, RegistrationScope};

/// Web URL of public GitHub, under which runner scopes are addressed.
pub const DEFAULT_SERVER_URL: &str = "https://github.com";

/// URL a worker passes to its registration step for `scope`.
pub fn registration_url(server_url: &str, scope: &RegistrationScope) -> String {
    let base = server_url.trim_end_matches('/');
    match scope {
        RegistrationScope::Repository { owner, repo } => format!("{base}/{owner}/{repo}"),
        RegistrationScope::Organization { owner } => format!("{base}/{owner}"),
    }
}

/// Launch parameters for one worker.
///
/// Sent as the JSON body to HTTP launchers and exported as `RUNNER_*`
/// variables to command backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    /// Worker registration name.
    pub runner_name: String,
    /// Registration token.
    pub runner_token: String,
    /// Registration labels.
    pub runner_labels: Vec<String>,
    /// Scope URL the worker registers against.
    pub registration_url: String,
    /// `owner/repo` of the job.
    pub repository: String,
    /// The queued job.
    pub job_id: u64,
    /// Browser URL of the job.
    pub job_url: String,
}

impl LaunchRequest {
    /// Collects launch parameters from a dispatch request.
    pub fn new(request: &DispatchRequest, server_url: &str) -> Self {
        Self {
            runner_name: request.execution_name.to_string(),
            runner_token: request.token.expose().to_string(),
            runner_labels: request.labels.to_strings(),
            registration_url: registration_url(server_url, &request.scope),
            repository: request.job.full_name(),
            job_id: request.job.job_id.as_u64(),
            job_url: request.job.job_url.clone(),
        }
    }

    /// Environment variables exported to a command backend.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RUNNER_NAME", self.runner_name.clone()),
            ("RUNNER_TOKEN", self.runner_token.clone()),
            ("RUNNER_LABELS", self.runner_labels.join(",")),
            ("RUNNER_URL", self.registration_url.clone()),
            ("RUNNER_REPOSITORY", self.repository.clone()),
            ("RUNNER_JOB_ID", self.job_id.to_string()),
            ("RUNNER_JOB_URL", self.job_url.clone()),
        ]
    }
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
