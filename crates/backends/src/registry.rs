//! Builds the [`BackendRegistry`] from configuration.
//!
//! Leaf backends (`command`, `http`) are built first; composites are resolved
//! in passes so that a composite may name another composite. A member that
//! never resolves is either unknown or part of a cycle.

use std::collections::HashSet;
use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;
use tracing::info;

use dispatch::{BackendDescriptor, BackendId, BackendRegistry, ComputeBackend};

use crate::command::CommandBackend;
use crate::composite::{DistributeBackend, FallbackBackend, Member};
use crate::config::{BackendConfig, BackendKind};
use crate::http::HttpBackend;

/// Errors raised while building backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// Two entries share an identifier.
    #[error("Backend '{backend}' is defined more than once")]
    Duplicate {
        /// The repeated identifier.
        backend: BackendId,
    },

    /// A composite has no members.
    #[error("Composite backend '{backend}' has no members")]
    EmptyComposite {
        /// The composite.
        backend: BackendId,
    },

    /// Every member of a distribute backend has weight zero.
    #[error("Distribute backend '{backend}' has no member with a positive weight")]
    NoWeight {
        /// The composite.
        backend: BackendId,
    },

    /// Composite members that are not defined, or that form a cycle.
    #[error("Backend '{backend}' references '{member}', which is undefined or cyclic")]
    UnresolvedMember {
        /// The composite.
        backend: BackendId,
        /// The member that could not be resolved.
        member: BackendId,
    },

    /// A launcher token variable is not set.
    #[error("Backend '{backend}' reads its token from '{variable}', which is not set")]
    MissingToken {
        /// The backend.
        backend: BackendId,
        /// The environment variable.
        variable: String,
    },
}

/// Shared inputs for every backend.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// HTTP client shared by HTTP launchers.
    pub http: reqwest::Client,
    /// Web URL of the source-control server, used for registration URLs.
    pub server_url: String,
}

/// The selector's view of every configured backend, in configured order.
pub fn descriptors(configs: &[BackendConfig]) -> Vec<BackendDescriptor> {
    configs.iter().map(BackendConfig::descriptor).collect()
}

/// Builds one backend per entry. `env` resolves launcher token variables.
pub fn build_registry(
    configs: &[BackendConfig],
    context: &BuildContext,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BackendRegistry, BuildError> {
    let mut seen = HashSet::new();
    for config in configs {
        if !seen.insert(&config.id) {
            return Err(BuildError::Duplicate {
                backend: config.id.clone(),
            });
        }
    }

    let mut registry = BackendRegistry::new();
    let mut pending = Vec::new();
    for config in configs {
        match &config.kind {
            BackendKind::Command(command) => {
                let backend =
                    CommandBackend::new(config.id.clone(), command.clone(), &context.server_url);
                registry.register(config.id.clone(), Arc::new(backend));
            }
            BackendKind::Http(http) => {
                let mut backend = HttpBackend::new(
                    config.id.clone(),
                    context.http.clone(),
                    &http.url,
                    http.timeout(),
                    &context.server_url,
                );
                if let Some(variable) = &http.token_env {
                    let token = env(variable).ok_or_else(|| BuildError::MissingToken {
                        backend: config.id.clone(),
                        variable: variable.clone(),
                    })?;
                    backend = backend.with_token(SecretString::from(token));
                }
                registry.register(config.id.clone(), Arc::new(backend));
            }
            BackendKind::Fallback { .. } | BackendKind::Distribute { .. } => pending.push(config),
        }
    }

    while !pending.is_empty() {
        let before = pending.len();
        let mut unresolved = Vec::new();
        for config in pending {
            match build_composite(config, &registry)? {
                Some(backend) => registry.register(config.id.clone(), backend),
                None => unresolved.push(config),
            }
        }
        if unresolved.len() == before {
            let config = unresolved[0];
            let member = member_ids(config)
                .into_iter()
                .find(|id| !registry.contains(id))
                .unwrap_or_else(|| config.id.clone());
            return Err(BuildError::UnresolvedMember {
                backend: config.id.clone(),
                member,
            });
        }
        pending = unresolved;
    }

    info!(backends = registry.len(), "Compute backends ready");
    Ok(registry)
}

fn member_ids(config: &BackendConfig) -> Vec<BackendId> {
    match &config.kind {
        BackendKind::Fallback { members } => members.clone(),
        BackendKind::Distribute { members } => members.iter().map(|m| m.backend.clone()).collect(),
        BackendKind::Command(_) | BackendKind::Http(_) => Vec::new(),
    }
}

/// Builds a composite once all of its members are registered.
fn build_composite(
    config: &BackendConfig,
    registry: &BackendRegistry,
) -> Result<Option<Arc<dyn ComputeBackend>>, BuildError> {
    let ids = member_ids(config);
    if ids.is_empty() {
        return Err(BuildError::EmptyComposite {
            backend: config.id.clone(),
        });
    }
    let mut members: Vec<Member> = Vec::with_capacity(ids.len());
    for id in ids {
        match registry.get(&id) {
            Ok(backend) => members.push((id, backend)),
            Err(_) => return Ok(None),
        }
    }

    let backend: Arc<dyn ComputeBackend> = match &config.kind {
        BackendKind::Distribute { members: weighted } => {
            let pairs = members
                .into_iter()
                .zip(weighted.iter().map(|m| m.weight))
                .collect();
            let backend = DistributeBackend::new(config.id.clone(), pairs).ok_or_else(|| {
                BuildError::NoWeight {
                    backend: config.id.clone(),
                }
            })?;
            Arc::new(backend)
        }
        _ => Arc::new(FallbackBackend::new(config.id.clone(), members)),
    };
    Ok(Some(backend))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
