//! GitHub infrastructure adapter for Ephemera.
//!
//! A single [`GithubClient`] implements every source-control port the core
//! needs:
//!
//! - [`dispatch::CredentialBroker`]: installation sessions, runner
//!   registration tokens, runner lookup and deletion, job cancellation;
//! - [`dispatch::DeploymentGate`]: whether a job's deployment still waits on
//!   an environment approval;
//! - [`dispatch::DeliveryLog`]: the App's webhook delivery history and
//!   redelivery requests.
//!
//! ## Architectural Layer
//!
//! **Infrastructure adapter.** The core depends only on the port traits; this
//! crate depends on the core, never the other way round.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`auth`] | App JWT signing and credential configuration |
//! | [`client`] | HTTP plumbing and the per-installation session cache |
//! | `broker` | Runner and job endpoints |
//! | `deployments` | Deployment status lookup |
//! | `deliveries` | Webhook delivery listing and redelivery |
//! | [`errors`] | [`GithubError`] and its mapping to provider errors |

pub mod auth;
mod broker;
pub mod client;
mod deliveries;
mod deployments;
pub mod errors;

pub use auth::GithubAuth;
pub use client::{GithubClient, GithubConfig, DEFAULT_API_BASE};
pub use errors::GithubError;
