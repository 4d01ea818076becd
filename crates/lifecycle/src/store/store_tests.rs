use std::sync::Arc;
use std::time::Duration;

use dispatch::{
    execution_name, CancelOutcome, CancelRequest, CreateOutcome, ExecutionRecord,
    ExecutionStatus, ExecutionStore, WorkflowStep,
};

use super::{FileExecutionStore, MemoryExecutionStore};
use crate::testing::{job_request, selection, t0};

fn record(job_id: u64) -> ExecutionRecord {
    let request = job_request(job_id);
    let name = execution_name(&request.owner, &request.repository, request.job_id, 1);
    ExecutionRecord::new(name, 1, request, selection("pool"), t0())
}

fn idle_cancel() -> CancelRequest {
    CancelRequest {
        reason: "idle".to_string(),
        requested_at: t0().plus(Duration::from_secs(5)),
    }
}

/// Behaviour every store must share.
async fn exercise(store: Arc<dyn ExecutionStore>) {
    let first = record(1);
    assert_eq!(
        store.create_if_absent(first.clone()).await.unwrap(),
        CreateOutcome::Created
    );
    match store.create_if_absent(record(1)).await.unwrap() {
        CreateOutcome::Exists(existing) => assert_eq!(*existing, first),
        CreateOutcome::Created => panic!("duplicate create must not succeed"),
    }

    // A driver writing back a stale copy keeps the idle watch's request.
    let stale = store.get(&first.name).await.unwrap().unwrap();
    assert_eq!(
        store.request_cancel(&first.name, idle_cancel()).await.unwrap(),
        CancelOutcome::Requested
    );
    let mut moved = stale;
    moved.enter(WorkflowStep::Dispatch, t0());
    store.put(moved).await.unwrap();
    let stored = store.get(&first.name).await.unwrap().unwrap();
    assert_eq!(stored.step, WorkflowStep::Dispatch);
    assert_eq!(stored.cancel, Some(idle_cancel()));

    let mut done = stored;
    done.conclude(ExecutionStatus::Aborted, t0().plus(Duration::from_secs(10)));
    store.put(done).await.unwrap();
    assert_eq!(
        store.request_cancel(&first.name, idle_cancel()).await.unwrap(),
        CancelOutcome::AlreadyTerminal
    );

    let other = record(2);
    store.create_if_absent(other.clone()).await.unwrap();
    let active = store.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, other.name);

    let recent = store.list_recent(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].name, first.name);

    let unknown = record(99).name;
    assert_eq!(
        store.request_cancel(&unknown, idle_cancel()).await.unwrap(),
        CancelOutcome::NotFound
    );
}

#[tokio::test]
async fn memory_store_follows_store_rules() {
    exercise(Arc::new(MemoryExecutionStore::new())).await;
}

#[tokio::test]
async fn file_store_follows_store_rules() {
    let dir = tempfile::tempdir().unwrap();
    exercise(Arc::new(FileExecutionStore::open(dir.path()).await.unwrap())).await;
}

#[tokio::test]
async fn put_of_unknown_record_is_rejected() {
    let store = MemoryExecutionStore::new();
    let err = store.put(record(3)).await.unwrap_err();
    assert!(matches!(err, dispatch::StoreError::NotFound { .. }));
}

#[tokio::test]
async fn file_store_reloads_records_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let original = record(4);
    {
        let store = FileExecutionStore::open(dir.path()).await.unwrap();
        store.create_if_absent(original.clone()).await.unwrap();
        store.request_cancel(&original.name, idle_cancel()).await.unwrap();
    }

    let reopened = FileExecutionStore::open(dir.path()).await.unwrap();
    let loaded = reopened.get(&original.name).await.unwrap().unwrap();
    assert_eq!(loaded.request, original.request);
    assert_eq!(loaded.cancel, Some(idle_cancel()));
    assert_eq!(reopened.list_active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn file_store_skips_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("garbage.json"), b"{ not json")
        .await
        .unwrap();

    let store = FileExecutionStore::open(dir.path()).await.unwrap();
    assert!(store.list_recent(10).await.unwrap().is_empty());
}
