//! In-process host for the orchestrator.
//!
//! One tokio task per execution repeatedly calls [`Orchestrator::advance`] and
//! sleeps until the instant it returns. The host guarantees at most one task
//! per execution name, which is what lets [`Orchestrator::advance`] treat a
//! record found mid-dispatch as interrupted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use dispatch::{DispatchError, ExecutionName, ExecutionStatus, StoreError};

use crate::clock::Clock;
use crate::orchestrator::{Advance, Orchestrator};

/// Wait after a failed `advance` before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive `advance` failures after which a task gives up. The record
/// stays in the store and is picked up again on the next restart.
const MAX_CONSECUTIVE_ERRORS: u32 = 20;

/// Runs one driver task per active execution.
#[derive(Clone)]
pub struct ExecutionHost {
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    running: Arc<Mutex<HashSet<ExecutionName>>>,
    error_backoff: Duration,
}

impl std::fmt::Debug for ExecutionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHost")
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

impl ExecutionHost {
    /// Creates a host with no running tasks.
    pub fn new(orchestrator: Arc<Orchestrator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orchestrator,
            clock,
            running: Arc::new(Mutex::new(HashSet::new())),
            error_backoff: ERROR_BACKOFF,
        }
    }

    /// Overrides the wait after a failed `advance`.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Returns the orchestrator this host drives.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Spawns a driver task for `name` unless one is already running.
    pub fn spawn(&self, name: ExecutionName) -> Option<JoinHandle<Option<ExecutionStatus>>> {
        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if !running.insert(name.clone()) {
                return None;
            }
        }

        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            name: name.clone(),
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let clock = Arc::clone(&self.clock);
        let backoff = self.error_backoff;
        let span = tracing::info_span!("execution_driver", execution = %name);

        Some(tokio::spawn(
            async move {
                let _guard = guard;
                drive(&orchestrator, clock.as_ref(), &name, backoff).await
            }
            .instrument(span),
        ))
    }

    /// Re-arms the idle watch and spawns a driver for every non-terminal
    /// record in the store.
    ///
    /// Called once at startup so executions survive a restart.
    pub async fn resume_all(&self) -> Result<usize, DispatchError> {
        let active = self.orchestrator.store().list_active().await?;
        let mut resumed = 0;
        for record in active {
            if !self.orchestrator.resume(&record).await? {
                continue;
            }
            if self.spawn(record.name).is_some() {
                resumed += 1;
            }
        }
        info!(resumed, "Resumed active executions");
        Ok(resumed)
    }

    /// Returns `true` while a driver task for `name` is alive.
    pub fn is_running(&self, name: &ExecutionName) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Number of live driver tasks.
    pub fn running_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn drive(
    orchestrator: &Orchestrator,
    clock: &dyn Clock,
    name: &ExecutionName,
    backoff: Duration,
) -> Option<ExecutionStatus> {
    let mut consecutive_errors = 0;
    loop {
        let now = clock.now();
        match orchestrator.advance(name, now).await {
            Ok(Advance::Finished(status)) => {
                info!(status = %status, "Execution concluded");
                return Some(status);
            }
            Ok(Advance::Waiting(until)) => {
                consecutive_errors = 0;
                tokio::time::sleep(until.saturating_since(now)).await;
            }
            Err(DispatchError::Store(StoreError::NotFound { .. })) => {
                warn!("Execution record disappeared; stopping driver");
                return None;
            }
            Err(err) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!(error = %err, consecutive_errors, "Giving up on execution until restart");
                    return None;
                }
                warn!(error = %err, consecutive_errors, "Advance failed; backing off");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Removes the execution from the running set when its task ends, including
/// on panic.
struct RunningGuard {
    running: Arc<Mutex<HashSet<ExecutionName>>>,
    name: ExecutionName,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
