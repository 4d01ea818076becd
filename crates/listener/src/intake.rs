//! Intake filter: turns a verified `workflow_job` delivery into a started
//! execution.
//!
//! Every outcome other than [`IntakeOutcome::Accepted`] is a soft no-op that
//! the sender must not retry. [`IntakeError`] variants map to 403 (bad
//! signature), 400 (unreadable payload) or 500 (a collaborator failed and a
//! redelivery may succeed).

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use dispatch::{
    BackendTable, DeploymentGate, DeploymentId, DispatchError, ExecutionName, HookError,
    HookInput, HookOverride, JobRequest, ProviderError, Selection, SelectorHook, SELF_HOSTED,
};
use lifecycle::{ExecutionHost, StartOutcome};

use crate::payload::WorkflowJobEvent;
use crate::signature::{self, SignatureError};

/// Event header.
pub const EVENT_HEADER: &str = "x-github-event";

/// Delivery id header.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Intake filter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Jobs that do not request this label are ignored. `None` accepts every
    /// job.
    pub require_label: Option<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            require_label: Some(SELF_HOSTED.to_string()),
        }
    }
}

/// The parts of a webhook request the intake filter reads.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    /// `X-GitHub-Event`.
    pub event: Option<&'a str>,
    /// `X-GitHub-Delivery`.
    pub id: Option<&'a str>,
    /// `X-Hub-Signature-256`.
    pub signature: Option<&'a str>,
    /// Raw request body.
    pub body: &'a [u8],
}

/// What the intake filter did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// A `ping` event.
    Pong,
    /// The delivery is not actionable.
    Ignored {
        /// Why.
        reason: String,
    },
    /// The job's deployment is still waiting on an approval.
    Deferred {
        /// The gating deployment.
        deployment: DeploymentId,
    },
    /// No backend serves the requested labels.
    NoMatch,
    /// The selector hook declined the job.
    Skipped,
    /// An execution serves the job.
    Accepted {
        /// Execution (and worker) name.
        name: ExecutionName,
        /// `true` when a running execution already served the job.
        existing: bool,
    },
}

/// Why a delivery could not be handled.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The signature did not verify.
    #[error("Webhook rejected: {0}")]
    Forbidden(#[from] SignatureError),

    /// The signed body is not a usable event.
    #[error("Malformed webhook payload: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },

    /// The deployment gate could not be read.
    #[error("Deployment gate lookup failed: {0}")]
    DeploymentGate(#[source] ProviderError),

    /// The selector hook failed or answered inconsistently.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// The execution could not be started.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ---------------------------------------------------------------------------

/// Verifies, filters and dispatches webhook deliveries.
pub struct Intake {
    secret: SecretString,
    config: IntakeConfig,
    table: Arc<BackendTable>,
    deployments: Arc<dyn DeploymentGate>,
    hook: Option<Arc<dyn SelectorHook>>,
    host: Arc<ExecutionHost>,
}

impl std::fmt::Debug for Intake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intake")
            .field("config", &self.config)
            .field("table", &self.table)
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Intake {
    /// Creates an intake filter without a selector hook.
    pub fn new(
        secret: SecretString,
        config: IntakeConfig,
        table: Arc<BackendTable>,
        deployments: Arc<dyn DeploymentGate>,
        host: Arc<ExecutionHost>,
    ) -> Self {
        Self {
            secret,
            config,
            table,
            deployments,
            hook: None,
            host,
        }
    }

    /// Consults `hook` before every selection.
    pub fn with_hook(mut self, hook: Arc<dyn SelectorHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The backend table used for selection.
    pub fn table(&self) -> &BackendTable {
        &self.table
    }

    /// The host running started executions.
    pub fn host(&self) -> &Arc<ExecutionHost> {
        &self.host
    }

    /// Handles one delivery.
    #[instrument(
        skip_all,
        fields(delivery = delivery.id.unwrap_or("-"), event = delivery.event.unwrap_or("-"))
    )]
    pub async fn handle(&self, delivery: Delivery<'_>) -> Result<IntakeOutcome, IntakeError> {
        signature::verify(
            self.secret.expose_secret().as_bytes(),
            delivery.body,
            delivery.signature,
        )
        .inspect_err(|err| warn!(error = %err, "Webhook signature rejected"))?;

        match delivery.event {
            Some("ping") => return Ok(IntakeOutcome::Pong),
            Some("workflow_job") => {}
            other => {
                return Ok(ignored(format!(
                    "event '{}' is not handled",
                    other.unwrap_or_default()
                )))
            }
        }

        let payload: serde_json::Value =
            serde_json::from_slice(delivery.body).map_err(|e| IntakeError::Malformed {
                message: e.to_string(),
            })?;
        let event: WorkflowJobEvent =
            serde_json::from_value(payload.clone()).map_err(|e| IntakeError::Malformed {
                message: e.to_string(),
            })?;

        if event.action != "queued" {
            return Ok(ignored(format!("action '{}' is not handled", event.action)));
        }
        let request = event
            .to_job_request()
            .ok_or_else(|| IntakeError::Malformed {
                message: "repository owner or name is empty".to_string(),
            })?;

        if let Some(label) = &self.config.require_label {
            if !request.labels.contains(label) {
                debug!(labels = %request.labels, "Job does not request the gate label");
                return Ok(ignored(format!("job does not request '{label}'")));
            }
        }

        if let Some(deployment) = request.deployment {
            let pending = self
                .deployments
                .is_pending(
                    request.installation,
                    &request.owner,
                    &request.repository,
                    deployment,
                )
                .await
                .map_err(IntakeError::DeploymentGate)?;
            if pending {
                info!(
                    deployment = %deployment,
                    job_id = %request.job_id,
                    "Job waits on a deployment gate"
                );
                return Ok(IntakeOutcome::Deferred { deployment });
            }
        }

        let selection = match self.select(&request, payload).await? {
            Ok(selection) => selection,
            Err(outcome) => return Ok(outcome),
        };
        self.start(request, selection).await
    }

    /// Picks a backend, or the soft outcome when none is chosen.
    async fn select(
        &self,
        request: &JobRequest,
        payload: serde_json::Value,
    ) -> Result<Result<Selection, IntakeOutcome>, IntakeError> {
        let default = self.table.select(&request.labels);

        let Some(hook) = &self.hook else {
            return Ok(default.ok_or(IntakeOutcome::NoMatch));
        };
        let input = HookInput {
            payload,
            backends: self.table.descriptors().to_vec(),
            default_selection: default.clone(),
        };
        let answer = hook.decide(&input).await?;
        let declined = matches!(answer, Some(HookOverride { backend: None, .. }));
        match self.table.apply_override(default, answer)? {
            Some(selection) => Ok(Ok(selection)),
            None if declined => {
                info!(job_id = %request.job_id, "Selector hook declined the job");
                Ok(Err(IntakeOutcome::Skipped))
            }
            None => Ok(Err(IntakeOutcome::NoMatch)),
        }
    }

    async fn start(
        &self,
        request: JobRequest,
        selection: Selection,
    ) -> Result<IntakeOutcome, IntakeError> {
        let outcome = self.host.orchestrator().start(request, selection).await?;
        let existing = matches!(outcome, StartOutcome::AlreadyRunning(_));
        let name = outcome.name().clone();
        // A no-op when a driver task already runs for this name.
        self.host.spawn(name.clone());
        Ok(IntakeOutcome::Accepted { name, existing })
    }
}

fn ignored(reason: String) -> IntakeOutcome {
    debug!(reason = %reason, "Delivery ignored");
    IntakeOutcome::Ignored { reason }
}

#[cfg(test)]
#[path = "intake_tests.rs"]
mod tests;
