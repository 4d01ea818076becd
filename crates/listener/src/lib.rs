//! Ephemera intake infrastructure.
//!
//! Receives `workflow_job` webhooks, verifies their HMAC-SHA256 signature,
//! filters them down to actionable queued jobs and hands each one to the
//! [`lifecycle::ExecutionHost`]. Also hosts the in-process idle-watch queue
//! and the HTTP client of the optional selector hook.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport details live here: header names, status
//! codes, request bodies. The [`lifecycle`] crate sees only the domain
//! [`dispatch::JobRequest`] and the ports it was built with.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`signature`] | `X-Hub-Signature-256` verification |
//! | [`payload`] | `workflow_job` payload shape |
//! | [`intake`] | The filter from verified delivery to started execution |
//! | [`hook`] | HTTP [`dispatch::SelectorHook`] client |
//! | [`queue`] | In-process [`dispatch::IdleWatchQueue`] and its consumer |
//! | [`server`] | axum router and graceful serve loop |

pub mod hook;
pub mod intake;
pub mod payload;
pub mod queue;
pub mod server;
pub mod signature;

#[cfg(test)]
mod testing;

pub use hook::{HookConfig, HttpSelectorHook};
pub use intake::{Delivery, Intake, IntakeConfig, IntakeError, IntakeOutcome};
pub use payload::WorkflowJobEvent;
pub use queue::{DelayQueue, IdleQueueConfig, IdleWatchConsumer};
pub use server::{router, serve, AppState, ServerConfig};
pub use signature::{sign, verify, SignatureError};
