//! Execution store implementations.
//!
//! Both stores share the write rules in this module so that the in-memory and
//! file-backed variants behave identically under concurrent driver and
//! idle-watch access.

mod file;
mod memory;

pub use file::FileExecutionStore;
pub use memory::MemoryExecutionStore;

use dispatch::{CancelOutcome, CancelRequest, ExecutionRecord};

/// Merges an incoming record over the stored one.
///
/// A pending cancellation in the store survives a write that carries none.
fn merge_put(stored: Option<&ExecutionRecord>, mut incoming: ExecutionRecord) -> ExecutionRecord {
    if incoming.cancel.is_none() {
        if let Some(cancel) = stored.and_then(|r| r.cancel.clone()) {
            incoming.cancel = Some(cancel);
        }
    }
    incoming
}

/// Applies a cancellation request to a stored record.
fn apply_cancel(record: Option<&mut ExecutionRecord>, request: CancelRequest) -> CancelOutcome {
    match record {
        None => CancelOutcome::NotFound,
        Some(record) if record.is_terminal() => CancelOutcome::AlreadyTerminal,
        Some(record) => {
            if record.cancel.is_none() {
                record.updated_at = request.requested_at;
                record.cancel = Some(request);
            }
            CancelOutcome::Requested
        }
    }
}

/// Sorts records most recently updated first and keeps `limit` of them.
fn most_recent(mut records: Vec<ExecutionRecord>, limit: usize) -> Vec<ExecutionRecord> {
    records.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    records.truncate(limit);
    records
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
