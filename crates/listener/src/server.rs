//! HTTP surface: webhook intake, status document and health probe.
//!
//! | Route | Response |
//! |-------|----------|
//! | `POST /webhook` | 202 accepted, 200 soft no-op, 400 malformed, 403 forbidden, 500 retry |
//! | `GET /status` | [`lifecycle::StatusSummary`] as JSON |
//! | `GET /health` | 200 `ok` |

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use lifecycle::{summarize, Clock, StatusSummary};

use crate::intake::{Delivery, Intake, IntakeError, IntakeOutcome, DELIVERY_HEADER, EVENT_HEADER};
use crate::signature::SIGNATURE_HEADER;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: String,
    /// Executions listed on `/status`.
    pub status_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            status_limit: 50,
        }
    }
}

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    intake: Arc<Intake>,
    clock: Arc<dyn Clock>,
    status_limit: usize,
}

impl AppState {
    /// Creates the state.
    pub fn new(intake: Arc<Intake>, clock: Arc<dyn Clock>, status_limit: usize) -> Self {
        Self {
            intake,
            clock,
            status_limit,
        }
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serves `app` on `listener` until `shutdown` resolves; in-flight requests
/// complete first.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "Intake server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Intake server stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let delivery = Delivery {
        event: header(EVENT_HEADER),
        id: header(DELIVERY_HEADER),
        signature: header(SIGNATURE_HEADER),
        body: &body,
    };

    match state.intake.handle(delivery).await {
        Ok(outcome) => outcome_response(outcome),
        Err(err) => error_response(&err),
    }
}

pub(crate) fn outcome_response(outcome: IntakeOutcome) -> (StatusCode, String) {
    match outcome {
        IntakeOutcome::Pong => (StatusCode::OK, "pong".to_string()),
        IntakeOutcome::Ignored { reason } => (StatusCode::OK, reason),
        IntakeOutcome::Deferred { deployment } => (
            StatusCode::OK,
            format!("waiting on deployment {deployment}"),
        ),
        IntakeOutcome::NoMatch => (StatusCode::OK, "no matching backend".to_string()),
        IntakeOutcome::Skipped => (StatusCode::OK, "skipped by selector hook".to_string()),
        IntakeOutcome::Accepted { name, .. } => (StatusCode::ACCEPTED, name.to_string()),
    }
}

pub(crate) fn error_response(err: &IntakeError) -> (StatusCode, String) {
    match err {
        IntakeError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden".to_string()),
        IntakeError::Malformed { message } => (StatusCode::BAD_REQUEST, message.clone()),
        IntakeError::DeploymentGate(_) | IntakeError::Hook(_) | IntakeError::Dispatch(_) => {
            error!(error = %err, "Webhook handling failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn handle_status(
    State(state): State<AppState>,
) -> Result<Json<StatusSummary>, (StatusCode, String)> {
    let store = state.intake.host().orchestrator().store();
    summarize(
        store.as_ref(),
        state.intake.table(),
        state.status_limit,
        state.clock.now(),
    )
    .await
    .map(Json)
    .map_err(|err| {
        error!(error = %err, "Status summary failed");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })
}

async fn handle_health() -> &'static str {
    "ok"
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
