//! Delivery recovery: resubmits intake deliveries the service failed to accept.
//!
//! The sender does not retry failed webhook deliveries on its own. Every scan
//! reads the delivery history newer than the last processed id, groups it by
//! logical event, and asks the sender to redeliver events whose latest attempt
//! failed, as long as the original failure is recent enough for the job to
//! still be queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use dispatch::{DeliveryGuid, DeliveryId, DeliveryLog, DeliveryRecord, ProviderError, Timestamp};

use crate::clock::Clock;

/// Scan cadence and windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Time between scans, in seconds.
    pub interval_secs: u64,
    /// How far back a scan reads the delivery history, in seconds.
    pub lookback_secs: u64,
    /// How long after the original failure redeliveries are still resubmitted,
    /// in seconds.
    pub freshness_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            lookback_secs: 60 * 60,
            freshness_secs: 3 * 60 * 60,
        }
    }
}

impl RecoveryConfig {
    /// Time between scans.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// History window read by each scan.
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    /// Resubmission window measured from the original failure.
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

// ---------------------------------------------------------------------------

/// First-failure times keyed by logical event.
///
/// Process-local and best effort: losing it only means a redelivery seen after
/// a restart is treated as a new failure.
#[derive(Debug, Default)]
pub struct FailureTable {
    first_failures: HashMap<DeliveryGuid, Timestamp>,
}

impl FailureTable {
    /// Returns when the event first failed, if known.
    pub fn first_failure(&self, guid: &DeliveryGuid) -> Option<Timestamp> {
        self.first_failures.get(guid).copied()
    }

    /// Records `at` as the first failure unless one is already known.
    pub fn record(&mut self, guid: DeliveryGuid, at: Timestamp) -> Timestamp {
        *self.first_failures.entry(guid).or_insert(at)
    }

    /// Forgets an event.
    pub fn forget(&mut self, guid: &DeliveryGuid) {
        self.first_failures.remove(guid);
    }

    /// Drops entries older than `horizon` before `now`.
    pub fn prune(&mut self, now: Timestamp, horizon: Duration) {
        let cutoff = now.minus(horizon);
        self.first_failures.retain(|guid, at| {
            let keep = *at >= cutoff;
            if !keep {
                debug!(guid = %guid, "Expiring delivery failure entry");
            }
            keep
        });
    }

    /// Number of tracked events.
    pub fn len(&self) -> usize {
        self.first_failures.len()
    }

    /// Returns `true` if no event is tracked.
    pub fn is_empty(&self) -> bool {
        self.first_failures.is_empty()
    }
}

/// What one scan did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Deliveries read from the history.
    pub scanned: usize,
    /// Deliveries the sender was asked to redeliver.
    pub resubmitted: Vec<DeliveryId>,
    /// Events given up on because their original failure is too old.
    pub abandoned: Vec<DeliveryGuid>,
}

#[derive(Debug, Default)]
struct ScanState {
    last_id: Option<DeliveryId>,
    failures: FailureTable,
}

// ---------------------------------------------------------------------------

/// Periodically resubmits failed intake deliveries.
pub struct DeliveryRecoveryWatcher {
    log: Arc<dyn DeliveryLog>,
    config: RecoveryConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<ScanState>,
}

impl std::fmt::Debug for DeliveryRecoveryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRecoveryWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryRecoveryWatcher {
    /// Creates a watcher with an empty failure table.
    pub fn new(log: Arc<dyn DeliveryLog>, config: RecoveryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            log,
            config,
            clock,
            state: Mutex::new(ScanState::default()),
        }
    }

    /// Runs one scan at `now`.
    #[instrument(skip(self))]
    pub async fn scan(&self, now: Timestamp) -> Result<ScanReport, ProviderError> {
        let mut state = self.state.lock().await;
        let not_before = now.minus(self.config.lookback());

        let mut deliveries = self.log.list_since(state.last_id, not_before).await?;
        deliveries.sort_by_key(|d| d.id);

        let mut report = ScanReport {
            scanned: deliveries.len(),
            ..ScanReport::default()
        };
        let Some(highest) = deliveries.last().map(|d| d.id) else {
            return Ok(report);
        };
        let mut advance_to = highest;

        for group in group_by_event(&deliveries) {
            let Some(latest) = group.last() else {
                continue;
            };
            let guid = &latest.guid;

            if group.iter().any(|d| d.succeeded) {
                state.failures.forget(guid);
                continue;
            }

            if let Some(original) = group.iter().find(|d| !d.redelivery) {
                state.failures.record(guid.clone(), original.delivered_at);
            }
            let resubmit = match state.failures.first_failure(guid) {
                Some(first) if now.saturating_since(first) <= self.config.freshness() => true,
                Some(first) => {
                    info!(
                        guid = %guid,
                        delivery = %latest.id,
                        first_failure = %first,
                        "Abandoning stale delivery"
                    );
                    state.failures.forget(guid);
                    report.abandoned.push(guid.clone());
                    false
                }
                None => {
                    debug!(guid = %guid, "Original failure unknown; tracking redelivery");
                    state.failures.record(guid.clone(), latest.delivered_at);
                    true
                }
            };
            if !resubmit {
                continue;
            }

            match self.log.redeliver(latest.id).await {
                Ok(()) => {
                    info!(guid = %guid, delivery = %latest.id, "Delivery resubmitted");
                    report.resubmitted.push(latest.id);
                }
                Err(err) => {
                    // Revisit this delivery on the next scan.
                    warn!(delivery = %latest.id, error = %err, "Redelivery request failed");
                    let before = DeliveryId::new(latest.id.as_u64().saturating_sub(1));
                    advance_to = advance_to.min(before);
                }
            }
        }

        state.last_id = Some(state.last_id.map_or(advance_to, |last| last.max(advance_to)));
        state
            .failures
            .prune(now, self.config.freshness() + self.config.lookback());
        Ok(report)
    }

    /// Returns the highest delivery id processed so far.
    pub async fn last_processed(&self) -> Option<DeliveryId> {
        self.state.lock().await.last_id
    }

    /// Scans on a fixed interval until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval_secs, "Delivery recovery watcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan(self.clock.now()).await {
                        Ok(report) if !report.resubmitted.is_empty() || !report.abandoned.is_empty() => {
                            info!(
                                scanned = report.scanned,
                                resubmitted = report.resubmitted.len(),
                                abandoned = report.abandoned.len(),
                                "Delivery recovery scan complete"
                            );
                        }
                        Ok(report) => debug!(scanned = report.scanned, "Delivery recovery scan complete"),
                        Err(err) => warn!(error = %err, "Delivery recovery scan failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Delivery recovery watcher stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Groups deliveries by logical event, preserving the order in which each
/// event first appears. Input must be sorted by id.
fn group_by_event(deliveries: &[DeliveryRecord]) -> Vec<Vec<&DeliveryRecord>> {
    let mut index: HashMap<&DeliveryGuid, usize> = HashMap::new();
    let mut groups: Vec<Vec<&DeliveryRecord>> = Vec::new();
    for delivery in deliveries {
        match index.get(&delivery.guid) {
            Some(&i) => groups[i].push(delivery),
            None => {
                index.insert(&delivery.guid, groups.len());
                groups.push(vec![delivery]);
            }
        }
    }
    groups
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
