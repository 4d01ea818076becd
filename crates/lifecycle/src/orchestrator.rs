//! The per-job lifecycle workflow.
//!
//! An execution moves `TokenFetch → Dispatch → Succeeded`, detouring through
//! `Cleanup` whenever an attempt fails. After cleanup the driver either
//! schedules another attempt under the retry envelope, fails the execution
//! (cancelling the job upstream), or aborts it because the idle watch asked
//! for cancellation.
//!
//! The orchestrator holds no per-execution state of its own. Every transition
//! is written back to the [`ExecutionStore`] before the next external call, so
//! [`Orchestrator::advance`] can be called again after a restart and pick up
//! where the record left off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use dispatch::{
    execution_name, retry_budget_findings, started_marker, AfterCleanup, BackendError, BackendId,
    BackendRegistry, BackendTable, CleanupState, CreateOutcome, CredentialBroker, DispatchError,
    DispatchRequest, ErrorRecord, ExecutionName, ExecutionRecord, ExecutionStatus, ExecutionStore,
    IdleWatchMessage, IdleWatchQueue, JobRequest, ProviderError, RegistrationScope,
    RegistrationToken, RetryOptions, RetryPolicy, RunnerLevel, Selection, StoreError, Timestamp,
    WorkflowStep, DEFAULT_JOB_QUEUE_EXPIRY,
};
use crate::clock::Clock;
use crate::metrics::ExecutionMetrics;

/// Reason recorded when the idle watch cancels an execution.
pub const IDLE_CANCEL_REASON: &str = "idle";

/// Tunables for the lifecycle workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Retry envelope for backends without their own override.
    pub retry: RetryOptions,
    /// Whether workers register against the repository or the organization.
    pub runner_level: RunnerLevel,
    /// Wait between delete attempts when cleanup finds the worker busy.
    pub cleanup_busy_interval: Duration,
    /// Delete attempts before cleanup gives up on a busy worker.
    pub cleanup_busy_attempts: u32,
    /// Idle threshold written into every idle-watch message.
    pub max_idle: Duration,
    /// Delay before the idle watch first looks at a new execution.
    pub idle_initial_delay: Duration,
    /// How long the provider keeps a job queued.
    pub job_queue_expiry: Duration,
    /// Cap on attempt-suffixed execution names per job.
    pub max_start_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryOptions::default(),
            runner_level: RunnerLevel::Repository,
            cleanup_busy_interval: Duration::from_secs(60),
            cleanup_busy_attempts: 10,
            max_idle: Duration::from_secs(5 * 60),
            idle_initial_delay: Duration::from_secs(5 * 60),
            job_queue_expiry: DEFAULT_JOB_QUEUE_EXPIRY,
            max_start_attempts: 100,
        }
    }
}

/// Result of [`Orchestrator::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new execution record was created and needs a driver.
    Started(ExecutionName),
    /// A non-terminal record already serves this job.
    AlreadyRunning(ExecutionName),
}

impl StartOutcome {
    /// Returns the execution name either way.
    pub fn name(&self) -> &ExecutionName {
        match self {
            StartOutcome::Started(name) | StartOutcome::AlreadyRunning(name) => name,
        }
    }
}

/// Result of one [`Orchestrator::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The execution concluded.
    Finished(ExecutionStatus),
    /// Nothing to do before the given instant.
    Waiting(Timestamp),
}

// ---------------------------------------------------------------------------

/// Drives execution records through the lifecycle workflow.
pub struct Orchestrator {
    config: OrchestratorConfig,
    retry_overrides: HashMap<BackendId, RetryOptions>,
    store: Arc<dyn ExecutionStore>,
    broker: Arc<dyn CredentialBroker>,
    backends: BackendRegistry,
    idle_queue: Arc<dyn IdleWatchQueue>,
    clock: Arc<dyn Clock>,
    metrics: ExecutionMetrics,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator. Per-backend retry overrides are taken from `table`.
    pub fn new(
        config: OrchestratorConfig,
        table: &BackendTable,
        store: Arc<dyn ExecutionStore>,
        broker: Arc<dyn CredentialBroker>,
        backends: BackendRegistry,
        idle_queue: Arc<dyn IdleWatchQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let findings =
            retry_budget_findings(&config.retry, table.descriptors(), config.job_queue_expiry);
        for finding in findings {
            warn!(level = ?finding.level, finding = %finding.message, "Retry budget");
        }

        let retry_overrides = table
            .descriptors()
            .iter()
            .filter_map(|d| d.retry.map(|retry| (d.id.clone(), retry)))
            .collect();
        Self {
            config,
            retry_overrides,
            store,
            broker,
            backends,
            idle_queue,
            clock,
            metrics: ExecutionMetrics::global(),
        }
    }

    /// Replaces the instruments taken from the global meter provider.
    pub fn with_metrics(mut self, metrics: ExecutionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the shared execution store.
    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Retry envelope in effect for jobs dispatched to `backend`.
    pub fn retry_for(&self, backend: &BackendId) -> RetryOptions {
        self.retry_overrides
            .get(backend)
            .copied()
            .unwrap_or(self.config.retry)
    }

    /// Idempotently creates the execution record for a job.
    ///
    /// Walks the attempt-suffixed names in order: a free name is claimed, a
    /// running record is returned as-is, a concluded one moves on to the next
    /// suffix. The idle-watch message is enqueued only for a freshly created
    /// record, before any dispatch happens.
    #[instrument(
        skip_all,
        fields(job_id = %request.job_id, repository = %request.full_name(), backend = %selection.backend)
    )]
    pub async fn start(
        &self,
        request: JobRequest,
        selection: Selection,
    ) -> Result<StartOutcome, DispatchError> {
        for attempt in 1..=self.config.max_start_attempts {
            let name = execution_name(&request.owner, &request.repository, request.job_id, attempt);
            let record = ExecutionRecord::new(
                name.clone(),
                attempt,
                request.clone(),
                selection.clone(),
                self.clock.now(),
            );

            match self.store.create_if_absent(record.clone()).await? {
                CreateOutcome::Created => {
                    self.metrics.started(&record);
                    self.enqueue_idle_watch(&name, &request).await?;
                    info!(execution = %name, attempt, "Execution started");
                    return Ok(StartOutcome::Started(name));
                }
                CreateOutcome::Exists(existing) if !existing.is_terminal() => {
                    debug!(execution = %name, "Execution already running for job");
                    return Ok(StartOutcome::AlreadyRunning(name));
                }
                CreateOutcome::Exists(existing) => {
                    debug!(
                        execution = %name,
                        status = %existing.status,
                        "Execution already concluded; trying next attempt name"
                    );
                }
            }
        }

        Err(DispatchError::StartAttemptsExhausted {
            job_id: request.job_id,
            attempts: self.config.max_start_attempts,
        })
    }

    /// Re-arms the idle watch for a record picked up after a restart.
    ///
    /// The idle-watch queue does not outlive the process. Returns `false` for
    /// a concluded record, which needs no watch and no driver.
    #[instrument(skip_all, fields(execution = %record.name, job_id = %record.request.job_id))]
    pub async fn resume(&self, record: &ExecutionRecord) -> Result<bool, DispatchError> {
        if record.is_terminal() {
            debug!("Execution already concluded; nothing to resume");
            return Ok(false);
        }
        let message = self.idle_watch_message(&record.name, &record.request);
        self.idle_queue
            .enqueue(message, self.config.idle_initial_delay)
            .await?;
        debug!("Idle watch re-armed");
        Ok(true)
    }

    fn idle_watch_message(&self, name: &ExecutionName, request: &JobRequest) -> IdleWatchMessage {
        IdleWatchMessage {
            execution_ref: name.clone(),
            owner: request.owner.clone(),
            repo: request.repository.clone(),
            identity: request.installation,
            max_idle_seconds: self.config.max_idle.as_secs(),
        }
    }

    async fn enqueue_idle_watch(
        &self,
        name: &ExecutionName,
        request: &JobRequest,
    ) -> Result<(), DispatchError> {
        let message = self.idle_watch_message(name, request);
        if let Err(err) = self
            .idle_queue
            .enqueue(message, self.config.idle_initial_delay)
            .await
        {
            // Without an idle watch the worker could linger forever. Conclude
            // the record so a redelivery starts a fresh attempt.
            error!(execution = %name, error = %err, "Idle watch enqueue failed");
            if let Some(mut record) = self.store.get(name).await? {
                record.last_error = Some(ErrorRecord {
                    message: err.to_string(),
                    policy: RetryPolicy::NonRetryable,
                });
                self.conclude(&mut record, ExecutionStatus::Failed, self.clock.now());
                self.store.put(record).await?;
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Performs every step of `name` that is due at `now`.
    ///
    /// Returns once the record concludes or has to wait. The record is
    /// persisted after every transition.
    #[instrument(skip(self, name), fields(execution = %name))]
    pub async fn advance(
        &self,
        name: &ExecutionName,
        now: Timestamp,
    ) -> Result<Advance, DispatchError> {
        let mut record = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| StoreError::NotFound { name: name.clone() })?;
        let mut now = now;

        loop {
            if record.is_terminal() || record.step == WorkflowStep::Done {
                return Ok(Advance::Finished(record.status));
            }
            if !record.is_due(now) {
                return Ok(Advance::Waiting(record.not_before.unwrap_or(now)));
            }

            match record.step {
                WorkflowStep::TokenFetch => self.attempt(&mut record, &mut now).await?,
                WorkflowStep::Dispatch => {
                    // Only reachable when a previous process stopped mid-dispatch.
                    warn!("Dispatch was interrupted; treating the attempt as failed");
                    self.fail_attempt(
                        &mut record,
                        "dispatch interrupted before the backend reported an outcome".to_string(),
                        RetryPolicy::Retryable { after: None },
                        now,
                    )
                    .await?;
                }
                WorkflowStep::Cleanup => self.cleanup(&mut record, now).await?,
                WorkflowStep::Done => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn attempt(
        &self,
        record: &mut ExecutionRecord,
        now: &mut Timestamp,
    ) -> Result<(), DispatchError> {
        self.refresh_cancel(record).await?;
        if let Some(cancel) = &record.cancel {
            info!(reason = %cancel.reason, "Cancellation requested before attempt");
            self.conclude(record, ExecutionStatus::Aborted, *now);
            return self.persist(record).await;
        }

        let scope = self.scope_for(&record.request);
        let token = match self.fetch_token(record, &scope).await {
            Ok(token) => token,
            Err(err) => {
                let policy = err.retry_policy();
                return self.fail_attempt(record, err.to_string(), policy, *now).await;
            }
        };

        record.enter(WorkflowStep::Dispatch, *now);
        self.persist(record).await?;

        let outcome = self.dispatch(record, token, scope, *now).await;
        *now = self.clock.now();

        match outcome {
            Ok(()) => {
                info!(
                    job_id = %record.request.job_id,
                    backend = %record.selection.backend,
                    "Worker completed"
                );
                self.conclude(record, ExecutionStatus::Succeeded, *now);
                self.persist(record).await
            }
            Err(err) => {
                self.refresh_cancel(record).await?;
                let policy = err.retry_policy();
                self.fail_attempt(record, err.to_string(), policy, *now).await
            }
        }
    }

    #[instrument(
        skip_all,
        fields(job_id = %record.request.job_id, scope = %scope)
    )]
    async fn fetch_token(
        &self,
        record: &ExecutionRecord,
        scope: &RegistrationScope,
    ) -> Result<RegistrationToken, ProviderError> {
        let session = self.broker.authenticate(record.request.installation).await?;
        let token = self
            .broker
            .issue_registration_token(&session, scope)
            .await?;
        debug!("Registration token issued");
        Ok(token)
    }

    #[instrument(
        skip_all,
        fields(job_id = %record.request.job_id, backend = %record.selection.backend)
    )]
    async fn dispatch(
        &self,
        record: &ExecutionRecord,
        token: RegistrationToken,
        scope: RegistrationScope,
        now: Timestamp,
    ) -> Result<(), BackendError> {
        let backend = self.backends.get(&record.selection.backend)?;
        let mut labels = record.selection.labels.clone();
        labels.insert(started_marker(now));

        let request = DispatchRequest {
            token,
            execution_name: record.name.clone(),
            labels,
            scope,
            job: record.request.clone(),
        };
        info!(labels = %request.labels, "Dispatching worker");
        backend.dispatch(&request).await
    }

    /// Records a failed attempt and routes the record into cleanup.
    async fn fail_attempt(
        &self,
        record: &mut ExecutionRecord,
        message: String,
        policy: RetryPolicy,
        now: Timestamp,
    ) -> Result<(), DispatchError> {
        let retry = self.retry_for(&record.selection.backend);
        let then = if record.cancel.is_some() {
            AfterCleanup::Abort
        } else if policy.is_retryable() && record.retries < retry.max_attempts {
            AfterCleanup::Retry
        } else {
            AfterCleanup::Fail
        };

        warn!(
            job_id = %record.request.job_id,
            backend = %record.selection.backend,
            error = %message,
            retryable = policy.is_retryable(),
            retries = record.retries,
            then = ?then,
            "Attempt failed"
        );

        record.last_error = Some(ErrorRecord { message, policy });
        record.enter(WorkflowStep::Cleanup, now);
        record.cleanup = Some(CleanupState {
            busy_attempts: 0,
            then,
        });
        self.persist(record).await
    }

    async fn cleanup(
        &self,
        record: &mut ExecutionRecord,
        now: Timestamp,
    ) -> Result<(), DispatchError> {
        let state = record.cleanup.unwrap_or(CleanupState {
            busy_attempts: 0,
            then: AfterCleanup::Fail,
        });

        match self.remove_worker(record).await {
            Ok(true) => info!("Worker registration removed"),
            Ok(false) => debug!("No worker registration to remove"),
            Err(ProviderError::WorkerBusy { .. })
                if state.busy_attempts + 1 < self.config.cleanup_busy_attempts =>
            {
                let until = now.plus(self.config.cleanup_busy_interval);
                info!(
                    busy_attempts = state.busy_attempts + 1,
                    retry_at = %until,
                    "Worker busy; cleanup will retry"
                );
                record.cleanup = Some(CleanupState {
                    busy_attempts: state.busy_attempts + 1,
                    ..state
                });
                record.not_before = Some(until);
                record.updated_at = now;
                return self.persist(record).await;
            }
            Err(err) => {
                warn!(error = %err, "Cleanup failed; continuing with the original error");
            }
        }

        self.after_cleanup(record, state.then, now).await
    }

    async fn after_cleanup(
        &self,
        record: &mut ExecutionRecord,
        then: AfterCleanup,
        now: Timestamp,
    ) -> Result<(), DispatchError> {
        match then {
            AfterCleanup::Retry => {
                let retry = self.retry_for(&record.selection.backend);
                record.retries += 1;
                let mut delay = retry.delay_for_retry(record.retries);
                if let Some(ErrorRecord {
                    policy: RetryPolicy::Retryable { after: Some(after) },
                    ..
                }) = &record.last_error
                {
                    delay = delay.max(*after);
                }
                let until = now.plus(delay);
                info!(retry = record.retries, retry_at = %until, "Retry scheduled");
                record.enter(WorkflowStep::TokenFetch, now);
                record.cleanup = None;
                record.not_before = Some(until);
            }
            AfterCleanup::Fail => {
                self.cancel_upstream(record).await;
                let cause = record
                    .last_error
                    .as_ref()
                    .map_or("unknown", |e| e.message.as_str());
                error!(
                    job_id = %record.request.job_id,
                    backend = %record.selection.backend,
                    error = cause,
                    "Execution failed"
                );
                self.conclude(record, ExecutionStatus::Failed, now);
            }
            AfterCleanup::Abort => {
                let reason = record
                    .cancel
                    .as_ref()
                    .map_or(IDLE_CANCEL_REASON, |c| c.reason.as_str());
                info!(reason, "Execution aborted");
                self.conclude(record, ExecutionStatus::Aborted, now);
            }
        }
        self.persist(record).await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn scope_for(&self, request: &JobRequest) -> RegistrationScope {
        RegistrationScope::for_level(self.config.runner_level, &request.owner, &request.repository)
    }

    /// Looks the worker up by name and deletes it. `Ok(false)` means it was
    /// already gone.
    async fn remove_worker(&self, record: &ExecutionRecord) -> Result<bool, ProviderError> {
        let session = self.broker.authenticate(record.request.installation).await?;
        let scope = self.scope_for(&record.request);
        match self.broker.find_worker(&session, &scope, &record.name).await? {
            Some(worker) => {
                self.broker.delete_worker(&session, &scope, &worker).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cancel_upstream(&self, record: &ExecutionRecord) {
        let request = &record.request;
        let result = match self.broker.authenticate(request.installation).await {
            Ok(session) => {
                self.broker
                    .cancel_job(&session, &request.owner, &request.repository, request.job_id)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(job_id = %request.job_id, error = %err, "Could not cancel job upstream");
        }
    }

    async fn refresh_cancel(&self, record: &mut ExecutionRecord) -> Result<(), DispatchError> {
        if record.cancel.is_none() {
            if let Some(latest) = self.store.get(&record.name).await? {
                record.cancel = latest.cancel;
            }
        }
        Ok(())
    }

    fn conclude(&self, record: &mut ExecutionRecord, status: ExecutionStatus, now: Timestamp) {
        record.conclude(status, now);
        self.metrics.concluded(record);
    }

    async fn persist(&self, record: &ExecutionRecord) -> Result<(), DispatchError> {
        self.store.put(record.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
