//! Ephemera compute backends.
//!
//! Each backend implements [`dispatch::ComputeBackend`]: given a registration
//! token and a worker name it launches one ephemeral worker and resolves once
//! that worker has finished.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** How a worker is actually started lives here; the
//! orchestrator only sees the trait objects in a [`dispatch::BackendRegistry`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `[[backends]]` entries |
//! | [`launch`] | Launch parameters handed to workers |
//! | [`command`] | Local program per worker |
//! | [`http`] | Launcher service over HTTP |
//! | [`composite`] | Fallback and weighted distribution |
//! | [`registry`] | Registry builder |

pub mod command;
pub mod composite;
pub mod config;
pub mod http;
pub mod launch;
pub mod registry;

#[cfg(test)]
mod testing;

pub use command::CommandBackend;
pub use composite::{DistributeBackend, FallbackBackend};
pub use config::{BackendConfig, BackendKind, CommandConfig, HttpConfig, WeightedMember};
pub use http::HttpBackend;
pub use launch::{registration_url, LaunchRequest, DEFAULT_SERVER_URL};
pub use registry::{build_registry, descriptors, BuildContext, BuildError};
