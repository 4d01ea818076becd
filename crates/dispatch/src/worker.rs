//! Workers, registration scopes, and the credentials used to manage them.
//!
//! The core never creates or destroys a worker itself. It asks the credential
//! broker for a registration token, hands that to a backend, and later looks the
//! worker up by name to read its state or delete its registration.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::labels::{Label, LabelSet};
use crate::{ExecutionName, InstallationId, Owner, RepositoryName, Timestamp, WorkerId};

/// Prefix of the registration label that records when a worker was started.
pub const STARTED_AT_LABEL_PREFIX: &str = "ephemera:started:";

/// Builds the started-at marker label for a worker registered at `at`.
pub fn started_marker(at: Timestamp) -> Label {
    Label::from_normalised(format!("{STARTED_AT_LABEL_PREFIX}{}", at.unix_seconds()))
}

/// Extracts the started-at marker from a worker's labels.
///
/// Returns `None` when no label carries a parsable marker.
pub fn parse_started_marker<'a>(labels: impl IntoIterator<Item = &'a str>) -> Option<Timestamp> {
    labels.into_iter().find_map(|label| {
        label
            .strip_prefix(STARTED_AT_LABEL_PREFIX)
            .and_then(|secs| secs.parse::<i64>().ok())
            .and_then(Timestamp::from_unix_seconds)
    })
}

// ---------------------------------------------------------------------------

/// Level at which workers are registered with the source-control provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerLevel {
    /// Workers register against the job's repository.
    #[default]
    Repository,
    /// Workers register against the owning organization.
    Organization,
}

/// Where a worker is registered: a repository or an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationScope {
    /// Repository-level registration.
    Repository {
        /// Repository owner.
        owner: Owner,
        /// Repository name.
        repo: RepositoryName,
    },
    /// Organization-level registration.
    Organization {
        /// Organization login.
        owner: Owner,
    },
}

impl RegistrationScope {
    /// Builds the scope for `owner/repo` at the configured runner level.
    pub fn for_level(level: RunnerLevel, owner: &Owner, repo: &RepositoryName) -> Self {
        match level {
            RunnerLevel::Repository => Self::Repository {
                owner: owner.clone(),
                repo: repo.clone(),
            },
            RunnerLevel::Organization => Self::Organization {
                owner: owner.clone(),
            },
        }
    }

    /// Returns the owning account.
    pub fn owner(&self) -> &Owner {
        match self {
            Self::Repository { owner, .. } | Self::Organization { owner } => owner,
        }
    }
}

impl std::fmt::Display for RegistrationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repository { owner, repo } => write!(f, "{owner}/{repo}"),
            Self::Organization { owner } => write!(f, "{owner}"),
        }
    }
}

// ---------------------------------------------------------------------------

/// A registered worker as reported by the source-control provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Provider-assigned identifier, used for deletion.
    pub id: WorkerId,
    /// Registration name; equals the execution name.
    pub name: ExecutionName,
    /// `true` while the worker is running a job.
    pub busy: bool,
    /// When the worker was started, from its registration marker label.
    pub started_at: Option<Timestamp>,
    /// Registration labels as reported by the provider.
    pub labels: LabelSet,
}

// ---------------------------------------------------------------------------

/// An authenticated session for one identity.
///
/// The credential broker caches sessions per identity; callers treat them as
/// opaque and short-lived.
#[derive(Clone)]
pub struct Session {
    /// The identity this session acts as.
    pub identity: InstallationId,
    token: SecretString,
    /// When the session's credential stops being valid, if known.
    pub expires_at: Option<Timestamp>,
}

impl Session {
    /// Creates a session from an access token.
    pub fn new(
        identity: InstallationId,
        token: SecretString,
        expires_at: Option<Timestamp>,
    ) -> Self {
        Self {
            identity,
            token,
            expires_at,
        }
    }

    /// Returns the access token. Never log the result.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Returns `true` if the session expires within `margin` of `now`.
    pub fn expires_within(&self, now: Timestamp, margin: std::time::Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now.plus(margin) >= expires_at)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A short-lived worker registration token.
#[derive(Clone)]
pub struct RegistrationToken(SecretString);

impl RegistrationToken {
    /// Wraps a raw registration token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Returns the raw token. Never log the result.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegistrationToken([REDACTED])")
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
