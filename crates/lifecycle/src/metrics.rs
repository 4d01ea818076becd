//! Execution metrics.
//!
//! Instruments are created from an OpenTelemetry [`Meter`]. With no meter
//! provider installed the global meter is a no-op, so recording is always
//! safe. Every data point carries the backend and the job's requested labels.
//!
//! | Instrument | Kind | Recorded when |
//! |------------|------|---------------|
//! | `ephemera.executions.started` | counter | a new execution record is created |
//! | `ephemera.executions.running` | up-down counter | +1 on start, -1 on conclusion |
//! | `ephemera.executions.succeeded` | counter | the worker completed its job |
//! | `ephemera.executions.failed` | counter | the execution failed |
//! | `ephemera.executions.aborted` | counter | the execution was cancelled |
//! | `ephemera.execution.duration` | histogram (s) | any conclusion, tagged with `outcome` |
//! | `ephemera.workers.reclaimed` | counter | the idle watch deleted a worker |
//! | `ephemera.worker.idle_duration` | histogram (s) | the idle watch deleted a worker |

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::{global, KeyValue};

use dispatch::{ExecutionRecord, ExecutionStatus, Timestamp};

/// Instrumentation scope for every instrument in this module.
pub const METER_NAME: &str = "ephemera";

/// Handles to the execution instruments.
#[derive(Clone)]
pub struct ExecutionMetrics {
    started: Counter<u64>,
    running: UpDownCounter<i64>,
    succeeded: Counter<u64>,
    failed: Counter<u64>,
    aborted: Counter<u64>,
    duration: Histogram<f64>,
    reclaimed: Counter<u64>,
    idle_duration: Histogram<f64>,
}

impl std::fmt::Debug for ExecutionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionMetrics").finish_non_exhaustive()
    }
}

impl ExecutionMetrics {
    /// Builds the instruments from the global meter provider.
    pub fn global() -> Self {
        Self::new(&global::meter(METER_NAME))
    }

    /// Builds the instruments from `meter`.
    pub fn new(meter: &Meter) -> Self {
        Self {
            started: meter
                .u64_counter("ephemera.executions.started")
                .with_description("Executions created for a queued job")
                .build(),
            running: meter
                .i64_up_down_counter("ephemera.executions.running")
                .with_description("Executions not yet concluded")
                .build(),
            succeeded: meter
                .u64_counter("ephemera.executions.succeeded")
                .with_description("Executions whose worker completed its job")
                .build(),
            failed: meter
                .u64_counter("ephemera.executions.failed")
                .with_description("Executions that failed")
                .build(),
            aborted: meter
                .u64_counter("ephemera.executions.aborted")
                .with_description("Executions concluded by a cancellation request")
                .build(),
            duration: meter
                .f64_histogram("ephemera.execution.duration")
                .with_description("Time from execution start to conclusion")
                .with_unit("s")
                .build(),
            reclaimed: meter
                .u64_counter("ephemera.workers.reclaimed")
                .with_description("Idle workers deleted by the idle watch")
                .build(),
            idle_duration: meter
                .f64_histogram("ephemera.worker.idle_duration")
                .with_description("How long a reclaimed worker sat idle")
                .with_unit("s")
                .build(),
        }
    }

    /// Records a freshly created execution.
    pub fn started(&self, record: &ExecutionRecord) {
        let attributes = attributes(record);
        self.started.add(1, &attributes);
        self.running.add(1, &attributes);
    }

    /// Records a conclusion. Call once, after `record.conclude`.
    pub fn concluded(&self, record: &ExecutionRecord) {
        let attributes = attributes(record);
        let counter = match record.status {
            ExecutionStatus::Succeeded => &self.succeeded,
            ExecutionStatus::Failed => &self.failed,
            ExecutionStatus::Aborted => &self.aborted,
            ExecutionStatus::Running => return,
        };
        counter.add(1, &attributes);
        self.running.add(-1, &attributes);

        let mut tagged = attributes;
        tagged.push(KeyValue::new("outcome", record.status.to_string()));
        self.duration
            .record(runtime_secs(record.created_at, record.updated_at), &tagged);
    }

    /// Records a worker deleted by the idle watch after `idle_for`.
    pub fn reclaimed(&self, record: &ExecutionRecord, idle_for: Duration) {
        let attributes = attributes(record);
        self.reclaimed.add(1, &attributes);
        self.idle_duration.record(idle_for.as_secs_f64(), &attributes);
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::global()
    }
}

/// Attributes shared by every data point about `record`.
pub fn attributes(record: &ExecutionRecord) -> Vec<KeyValue> {
    vec![
        KeyValue::new("backend", record.selection.backend.as_str().to_string()),
        KeyValue::new("labels", record.request.labels.to_string()),
    ]
}

/// Seconds between `from` and `to`, zero if the clock went backwards.
pub fn runtime_secs(from: Timestamp, to: Timestamp) -> f64 {
    to.saturating_since(from).as_secs_f64()
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
