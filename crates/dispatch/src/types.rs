//! Shared value types for the dispatch domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! data with invariants and move between components: a [`JobRequest`] flows from
//! intake to the orchestrator, a [`Selection`] records the backend decision, and
//! an [`IdleWatchMessage`] is the wire shape of the idle-watch queue.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::LabelSet;
use crate::retry::RetryOptions;
use crate::{
    BackendId, DeploymentId, ExecutionName, InstallationId, JobId, Owner, RepositoryName, RunId,
};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from whole seconds since the Unix epoch.
    ///
    /// Returns `None` if the value is out of the representable range.
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns whole seconds since the Unix epoch.
    pub fn unix_seconds(self) -> i64 {
        self.0.timestamp()
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns this timestamp shifted forward by `by`, saturating at the
    /// maximum representable instant.
    pub fn plus(self, by: Duration) -> Self {
        chrono::Duration::from_std(by)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Returns this timestamp shifted backward by `by`, saturating at the
    /// minimum representable instant.
    pub fn minus(self, by: Duration) -> Self {
        chrono::Duration::from_std(by)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MIN_UTC))
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is later.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A verified request for one worker to run one queued job.
///
/// Built by the intake filter from a `workflow_job` event; immutable from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Repository owner (user or organization login).
    pub owner: Owner,
    /// Repository name.
    pub repository: RepositoryName,
    /// The queued job.
    pub job_id: JobId,
    /// Browser URL of the job, used in diagnostics.
    pub job_url: String,
    /// Identity whose credentials are used for this job.
    pub installation: InstallationId,
    /// Labels from the workflow's `runs-on`, normalised.
    pub labels: LabelSet,
    /// Deployment whose protection rules may still be gating the job.
    pub deployment: Option<DeploymentId>,
    /// Workflow run the job belongs to, when the payload carries it.
    pub run_id: Option<RunId>,
    /// Head branch of the run, when the payload carries it.
    pub head_branch: Option<String>,
}

impl JobRequest {
    /// Returns `"owner/repo"`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// A configured compute backend as seen by the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend identifier.
    pub id: BackendId,
    /// Capability labels this backend advertises, in configured order.
    pub labels: LabelSet,
    /// Retry envelope override for jobs dispatched to this backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOptions>,
}

impl BackendDescriptor {
    /// Creates a descriptor without a retry override.
    pub fn new(id: BackendId, labels: LabelSet) -> Self {
        Self {
            id,
            labels,
            retry: None,
        }
    }
}

/// The backend decision for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Backend the worker will run on.
    pub backend: BackendId,
    /// Labels the worker registers under.
    pub labels: LabelSet,
}

// ---------------------------------------------------------------------------
// Idle watch
// ---------------------------------------------------------------------------

/// Idle-watch queue message.
///
/// Serialised in camelCase because it is the queue's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleWatchMessage {
    /// Execution (and worker) name to watch.
    pub execution_ref: ExecutionName,
    /// Repository owner.
    pub owner: Owner,
    /// Repository name.
    pub repo: RepositoryName,
    /// Identity used to look up and delete the worker.
    pub identity: InstallationId,
    /// Idle threshold in seconds.
    pub max_idle_seconds: u64,
}

impl IdleWatchMessage {
    /// Returns the idle threshold as a [`Duration`].
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_seconds)
    }
}
