//! Dispatch domain for Ephemera.
//!
//! This crate holds every domain concept used to turn a queued CI job into one
//! ephemeral worker: newtype identifiers, capability labels, the backend
//! selector, retry arithmetic, execution records and the error taxonomy.
//! Infrastructure crates implement the port traits defined in [`ports`]; they
//! never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`JobId`, `BackendId`, `ExecutionName`, etc.) |
//! | [`labels`] | Normalised capability labels and ordered label sets |
//! | [`types`] | Shared value types (`Timestamp`, `JobRequest`, `Selection`, etc.) |
//! | [`worker`] | Worker handles, registration scopes, sessions and tokens |
//! | [`retry`] | Retry envelope and budget projection |
//! | [`selector`] | Backend table validation, default selection, hook overrides |
//! | [`execution`] | Execution records and deterministic naming |
//! | [`delivery`] | Intake delivery history records |
//! | [`errors`] | Error enums and retry-policy classification |
//! | [`ports`] | Traits implemented by infrastructure crates |

pub mod delivery;
pub mod errors;
pub mod execution;
pub mod identifiers;
pub mod labels;
pub mod ports;
pub mod retry;
pub mod selector;
pub mod types;
pub mod worker;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use delivery::DeliveryRecord;
pub use errors::{
    BackendError, DispatchError, HookError, ProviderError, QueueError, RetryPolicy, StoreError,
};
pub use execution::{
    execution_name, AfterCleanup, CancelRequest, CleanupState, ErrorRecord, ExecutionRecord,
    ExecutionStatus, WorkflowStep, MAX_EXECUTION_NAME_LEN,
};
pub use identifiers::{
    BackendId, DeliveryGuid, DeliveryId, DeploymentId, ExecutionName, InstallationId, JobId,
    Owner, RepositoryName, RunId, WorkerId,
};
pub use labels::{Label, LabelSet, SELF_HOSTED};
pub use ports::{
    BackendRegistry, CancelOutcome, ComputeBackend, CreateOutcome, CredentialBroker, DeliveryLog,
    DeploymentGate, DispatchRequest, ExecutionStore, IdleWatchQueue, SelectorHook,
};
pub use retry::{retry_budget_findings, RetryOptions, DEFAULT_JOB_QUEUE_EXPIRY};
pub use selector::{
    validate_backend_table, BackendTable, Finding, FindingLevel, HookInput, HookOverride,
};
pub use types::{BackendDescriptor, IdleWatchMessage, JobRequest, Selection, Timestamp};
pub use worker::{
    parse_started_marker, started_marker, RegistrationScope, RegistrationToken, RunnerLevel,
    Session, WorkerHandle, STARTED_AT_LABEL_PREFIX,
};
