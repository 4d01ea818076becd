//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`JobId`] with an [`InstallationId`] even though both are `u64` under the
//! hood.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (GitHub-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: GitHub-integer-backed
// ---------------------------------------------------------------------------

u64_id! {
    /// Identifies a single `workflow_job` within a workflow run.
    ///
    /// Stable across webhook redeliveries, which is what makes it usable as the
    /// idempotency key for execution naming.
    JobId
}

u64_id! {
    /// Identifies the workflow run a job belongs to.
    RunId
}

u64_id! {
    /// Identifies the GitHub App installation (or configured identity) whose
    /// credentials are used for every source-control call made for a job.
    InstallationId
}

u64_id! {
    /// Identifies one webhook delivery attempt in the intake channel's history.
    ///
    /// Every redelivery gets a fresh, larger id.
    DeliveryId
}

u64_id! {
    /// Identifies a registered runner, as assigned by the source-control provider.
    WorkerId
}

u64_id! {
    /// Identifies a deployment whose environment protection rules may gate a job.
    DeploymentId
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// The account (user or organization) that owns a repository.
    Owner
}

string_id! {
    /// A repository name without its owner (e.g. `"my-service"`).
    RepositoryName
}

string_id! {
    /// Identifies a configured compute backend.
    ///
    /// Backend identifiers are unique within the backend table and are the key
    /// used by the selector hook when it names a backend.
    BackendId
}

string_id! {
    /// Logical event identifier shared by an original delivery and all of its
    /// redeliveries (GitHub's `X-GitHub-Delivery` GUID).
    DeliveryGuid
}

string_id! {
    /// The deterministic name of an execution record.
    ///
    /// Doubles as the worker's registration name, which is how the idle watch
    /// and cleanup find the worker again. Construct via
    /// [`crate::execution::execution_name`].
    ExecutionName
}

impl ExecutionName {
    /// Wraps a name the caller has already built to be non-empty.
    pub(crate) fn from_nonempty(value: String) -> Self {
        debug_assert!(!value.is_empty());
        Self(value)
    }
}
