//! Idle watch: reclaims workers that registered but never picked up work.
//!
//! The watcher runs independently of the driver. It only reads execution
//! records and writes cancellation requests into them; the driver notices the
//! request when the worker's dispatch returns and concludes the record as
//! aborted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use dispatch::{
    CancelOutcome, CancelRequest, CredentialBroker, DispatchError, ExecutionStore,
    IdleWatchMessage, ProviderError, RegistrationScope, RunnerLevel, Timestamp,
};

use crate::clock::Clock;
use crate::metrics::ExecutionMetrics;
use crate::orchestrator::IDLE_CANCEL_REASON;

/// Outcome of handling one idle-watch message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    /// The execution has ended; the message is done.
    Drop,
    /// Check again after the retry delay.
    Retry,
    /// The worker was idle too long: cancellation was requested and its
    /// registration deleted.
    Reclaimed,
}

/// Consumer logic for idle-watch messages.
pub struct IdleWatcher {
    store: Arc<dyn ExecutionStore>,
    broker: Arc<dyn CredentialBroker>,
    runner_level: RunnerLevel,
    clock: Arc<dyn Clock>,
    metrics: ExecutionMetrics,
}

impl std::fmt::Debug for IdleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleWatcher")
            .field("runner_level", &self.runner_level)
            .finish_non_exhaustive()
    }
}

impl IdleWatcher {
    /// Creates a watcher over the shared store.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        broker: Arc<dyn CredentialBroker>,
        runner_level: RunnerLevel,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            broker,
            runner_level,
            clock,
            metrics: ExecutionMetrics::global(),
        }
    }

    /// Replaces the instruments taken from the global meter provider.
    pub fn with_metrics(mut self, metrics: ExecutionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decides what to do with one message at `now`.
    ///
    /// Errors from the store or the provider are returned as-is; callers treat
    /// them as [`IdleDecision::Retry`].
    #[instrument(skip_all, fields(execution = %message.execution_ref))]
    pub async fn handle(
        &self,
        message: &IdleWatchMessage,
        now: Timestamp,
    ) -> Result<IdleDecision, DispatchError> {
        let name = &message.execution_ref;
        let record = match self.store.get(name).await? {
            Some(record) if !record.is_terminal() => record,
            Some(record) => {
                debug!(status = %record.status, "Execution concluded; dropping idle watch");
                return Ok(IdleDecision::Drop);
            }
            None => {
                debug!("Execution record missing; dropping idle watch");
                return Ok(IdleDecision::Drop);
            }
        };

        let session = self.broker.authenticate(message.identity).await?;
        let scope = RegistrationScope::for_level(self.runner_level, &message.owner, &message.repo);

        let Some(worker) = self.broker.find_worker(&session, &scope, name).await? else {
            debug!("Worker not registered yet");
            return Ok(IdleDecision::Retry);
        };
        if worker.busy {
            debug!("Worker is busy");
            return Ok(IdleDecision::Retry);
        }
        let Some(started_at) = worker.started_at else {
            warn!(worker = %worker.id, "Worker carries no started-at marker");
            return Ok(IdleDecision::Retry);
        };

        let idle_for = now.saturating_since(started_at);
        if idle_for <= message.max_idle() {
            debug!(idle_secs = idle_for.as_secs(), "Worker idle within threshold");
            return Ok(IdleDecision::Retry);
        }

        let request = CancelRequest {
            reason: IDLE_CANCEL_REASON.to_string(),
            requested_at: now,
        };
        match self.store.request_cancel(name, request).await? {
            CancelOutcome::Requested => {}
            CancelOutcome::AlreadyTerminal | CancelOutcome::NotFound => {
                debug!("Execution ended before cancellation; dropping idle watch");
                return Ok(IdleDecision::Drop);
            }
        }

        match self.broker.delete_worker(&session, &scope, &worker).await {
            Ok(()) => {
                info!(
                    worker = %worker.id,
                    idle_secs = idle_for.as_secs(),
                    max_idle_secs = message.max_idle_seconds,
                    "Idle worker reclaimed"
                );
                self.metrics.reclaimed(&record, idle_for);
                Ok(IdleDecision::Reclaimed)
            }
            Err(ProviderError::WorkerBusy { .. }) => {
                // The cancel request is not withdrawn. If the job the worker
                // picked up fails, the execution concludes as aborted rather
                // than retrying; a successful job still concludes succeeded.
                warn!(
                    worker = %worker.id,
                    cancel_pending = true,
                    reclaim_lost_race = true,
                    "Worker picked up a job during reclaim; cancellation stays pending"
                );
                Ok(IdleDecision::Retry)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Handles a batch and returns the keys of the messages to redeliver.
    ///
    /// Each message gets at most `per_message` to complete. A timeout or an
    /// error counts as a retry; other messages in the batch are unaffected.
    pub async fn handle_batch<K>(
        &self,
        batch: Vec<(K, IdleWatchMessage)>,
        per_message: Duration,
    ) -> Vec<K> {
        let mut retry = Vec::new();
        for (key, message) in batch {
            let now = self.clock.now();
            let decision = match tokio::time::timeout(per_message, self.handle(&message, now)).await
            {
                Ok(Ok(decision)) => decision,
                Ok(Err(err)) => {
                    warn!(execution = %message.execution_ref, error = %err, "Idle check failed");
                    IdleDecision::Retry
                }
                Err(_) => {
                    warn!(execution = %message.execution_ref, "Idle check timed out");
                    IdleDecision::Retry
                }
            };
            if decision == IdleDecision::Retry {
                retry.push(key);
            }
        }
        retry
    }
}

#[cfg(test)]
#[path = "idle_watch_tests.rs"]
mod tests;
