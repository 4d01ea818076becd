//! The parts of a `workflow_job` event the intake filter reads.

use serde::Deserialize;

use dispatch::{
    DeploymentId, InstallationId, JobId, JobRequest, LabelSet, Owner, RepositoryName, RunId,
};

/// A `workflow_job` event body.
#[derive(Debug, Deserialize)]
pub struct WorkflowJobEvent {
    /// Event action: `queued`, `in_progress`, `completed`, ...
    pub action: String,
    /// The job.
    pub workflow_job: WorkflowJob,
    /// The repository the job runs in.
    pub repository: Repository,
    /// The App installation that received the event, if any.
    #[serde(default)]
    pub installation: Option<Installation>,
    /// Deployment the job targets, if its environment has protection rules.
    #[serde(default)]
    pub deployment: Option<Deployment>,
}

/// `workflow_job` object.
#[derive(Debug, Deserialize)]
pub struct WorkflowJob {
    /// Job id.
    pub id: u64,
    /// Workflow run id.
    #[serde(default)]
    pub run_id: Option<u64>,
    /// Browser URL of the job.
    #[serde(default)]
    pub html_url: String,
    /// `runs-on` labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Branch of the run.
    #[serde(default)]
    pub head_branch: Option<String>,
}

/// `repository` object.
#[derive(Debug, Deserialize)]
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// Owning account.
    pub owner: Account,
}

/// `repository.owner` object.
#[derive(Debug, Deserialize)]
pub struct Account {
    /// Account login.
    pub login: String,
}

/// `installation` object.
#[derive(Debug, Deserialize)]
pub struct Installation {
    /// Installation id.
    pub id: u64,
}

/// `deployment` object.
#[derive(Debug, Deserialize)]
pub struct Deployment {
    /// Deployment id.
    pub id: u64,
}

impl WorkflowJobEvent {
    /// Builds the job request, or `None` if the repository is unnamed.
    pub fn to_job_request(&self) -> Option<JobRequest> {
        Some(JobRequest {
            owner: Owner::new(self.repository.owner.login.as_str())?,
            repository: RepositoryName::new(self.repository.name.as_str())?,
            job_id: JobId::new(self.workflow_job.id),
            job_url: self.workflow_job.html_url.clone(),
            // Token-authenticated deployments have no installation.
            installation: InstallationId::new(self.installation.as_ref().map_or(0, |i| i.id)),
            labels: LabelSet::from_strs(&self.workflow_job.labels),
            deployment: self.deployment.as_ref().map(|d| DeploymentId::new(d.id)),
            run_id: self.workflow_job.run_id.map(RunId::new),
            head_branch: self.workflow_job.head_branch.clone(),
        })
    }
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
