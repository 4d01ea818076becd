//! Backends built from other backends.

use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::{debug, instrument, warn};

use dispatch::{BackendError, BackendId, ComputeBackend, DispatchRequest};

/// A registered member of a composite backend.
pub type Member = (BackendId, Arc<dyn ComputeBackend>);

/// Tries members in order until one dispatches successfully.
pub struct FallbackBackend {
    id: BackendId,
    members: Vec<Member>,
}

impl std::fmt::Debug for FallbackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<&BackendId> = self.members.iter().map(|(id, _)| id).collect();
        f.debug_struct("FallbackBackend")
            .field("id", &self.id)
            .field("members", &members)
            .finish()
    }
}

impl FallbackBackend {
    /// Creates the backend. `members` must not be empty.
    pub fn new(id: BackendId, members: Vec<Member>) -> Self {
        Self { id, members }
    }
}

#[async_trait]
impl ComputeBackend for FallbackBackend {
    #[instrument(skip(self, request), fields(backend = %self.id, execution = %request.execution_name))]
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError> {
        let mut failures = Vec::with_capacity(self.members.len());
        let mut retryable = false;

        for (member, backend) in &self.members {
            match backend.dispatch(request).await {
                Ok(()) => {
                    debug!(member = %member, "Fallback member dispatched");
                    return Ok(());
                }
                Err(err) => {
                    warn!(member = %member, error = %err, "Fallback member failed");
                    retryable |= err.retry_policy().is_retryable();
                    failures.push(format!("{member}: {err}"));
                }
            }
        }

        Err(BackendError::Failed {
            backend: self.id.clone(),
            message: format!("all members failed ({})", failures.join("; ")),
            retryable,
        })
    }
}

// ---------------------------------------------------------------------------

/// Dispatches each request to one member chosen at random by weight.
pub struct DistributeBackend {
    id: BackendId,
    members: Vec<Member>,
    weights: WeightedIndex<u32>,
}

impl std::fmt::Debug for DistributeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<&BackendId> = self.members.iter().map(|(id, _)| id).collect();
        f.debug_struct("DistributeBackend")
            .field("id", &self.id)
            .field("members", &members)
            .finish()
    }
}

impl DistributeBackend {
    /// Creates the backend. Returns `None` when no member has a positive
    /// weight.
    pub fn new(id: BackendId, weighted: Vec<(Member, u32)>) -> Option<Self> {
        let weights = WeightedIndex::new(weighted.iter().map(|(_, w)| *w)).ok()?;
        let members = weighted.into_iter().map(|(member, _)| member).collect();
        Some(Self {
            id,
            members,
            weights,
        })
    }

    fn pick(&self) -> &Member {
        let index = self.weights.sample(&mut rand::thread_rng());
        &self.members[index]
    }
}

#[async_trait]
impl ComputeBackend for DistributeBackend {
    #[instrument(skip(self, request), fields(backend = %self.id, execution = %request.execution_name))]
    async fn dispatch(&self, request: &DispatchRequest) -> Result<(), BackendError> {
        let (member, backend) = self.pick();
        debug!(member = %member, "Distributing dispatch");
        backend.dispatch(request).await
    }
}

#[cfg(test)]
#[path = "composite_tests.rs"]
mod tests;
