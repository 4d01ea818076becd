//! `[[backends]]` configuration entries.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dispatch::{BackendDescriptor, BackendId, LabelSet, RetryOptions};

/// Default limit for a command worker run: six hours, the longest a hosted
/// job may run.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// Default limit for an HTTP launcher call.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// One configured backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub id: BackendId,
    /// Capability labels the backend advertises.
    pub labels: Vec<String>,
    /// Retry envelope override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOptions>,
    /// How workers are launched.
    #[serde(flatten)]
    pub kind: BackendKind,
}

impl BackendConfig {
    /// The selector's view of this backend.
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            id: self.id.clone(),
            labels: LabelSet::from_strs(&self.labels),
            retry: self.retry,
        }
    }
}

/// Launch mechanism of a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// Runs a local program per worker.
    Command(CommandConfig),
    /// POSTs each dispatch to a launcher service.
    Http(HttpConfig),
    /// Tries members in order until one dispatches successfully.
    Fallback {
        /// Member backend ids, in preference order.
        members: Vec<BackendId>,
    },
    /// Picks one member at random, proportionally to its weight.
    Distribute {
        /// Weighted members.
        members: Vec<WeightedMember>,
    },
}

/// Settings of a [`BackendKind::Command`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory; inherits the service's when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Maximum run time of one worker, in seconds.
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl CommandConfig {
    /// Maximum run time of one worker.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings of a [`BackendKind::Http`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Launcher endpoint.
    pub url: String,
    /// Environment variable holding a bearer token for the launcher.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Maximum time to wait for the launcher to report completion, in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl HttpConfig {
    /// Maximum time to wait for the launcher.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A member of a [`BackendKind::Distribute`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedMember {
    /// Member backend id.
    pub backend: BackendId,
    /// Relative weight; zero disables the member.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_weight() -> u32 {
    1
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
