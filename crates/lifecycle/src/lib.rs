//! Ephemera lifecycle orchestration.
//!
//! This crate sequences calls between the domain rules in [`dispatch`] and the
//! infrastructure ports (credential broker, compute backends, idle-watch queue,
//! delivery log). It contains no transport code of its own.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Two independent loops share one by-name
//! [`dispatch::ExecutionStore`]:
//!
//! - the driver ([`Orchestrator`] hosted by [`ExecutionHost`]) advances each
//!   execution through token fetch, dispatch and cleanup;
//! - the [`IdleWatcher`] polls workers and writes cancellation requests.
//!
//! The idle watcher never calls the orchestrator. The
//! [`DeliveryRecoveryWatcher`] runs out of band against the intake channel.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`orchestrator`] | Idempotent start and the `advance` state machine |
//! | [`host`] | One driver task per execution; resume on startup |
//! | [`idle_watch`] | Idle-worker detection and reclaim |
//! | [`metrics`] | OpenTelemetry execution counters and runtime histograms |
//! | [`recovery`] | Failed-delivery resubmission |
//! | [`store`] | In-memory and file-backed execution stores |
//! | [`status`] | Status endpoint document |
//! | [`clock`] | Injectable wall clock |

pub mod clock;
pub mod host;
pub mod idle_watch;
pub mod metrics;
pub mod orchestrator;
pub mod recovery;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use host::ExecutionHost;
pub use idle_watch::{IdleDecision, IdleWatcher};
pub use metrics::ExecutionMetrics;
pub use orchestrator::{
    Advance, Orchestrator, OrchestratorConfig, StartOutcome, IDLE_CANCEL_REASON,
};
pub use recovery::{DeliveryRecoveryWatcher, FailureTable, RecoveryConfig, ScanReport};
pub use status::{summarize, ExecutionSummary, StatusCounts, StatusSummary};
pub use store::{FileExecutionStore, MemoryExecutionStore};
