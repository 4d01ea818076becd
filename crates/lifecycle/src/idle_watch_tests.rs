use std::time::Duration;

use super::*;
use crate::store::MemoryExecutionStore;
use crate::testing::{idle_worker, job_request, selection, t0, FakeBroker, ManualClock};
use dispatch::{execution_name, ExecutionRecord, ExecutionStatus, ExecutionStore};

const MAX_IDLE: u64 = 300;

struct Fixture {
    watcher: IdleWatcher,
    store: Arc<MemoryExecutionStore>,
    broker: Arc<FakeBroker>,
    message: IdleWatchMessage,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryExecutionStore::new());
    let broker = Arc::new(FakeBroker::default());
    let request = job_request(42);
    let name = execution_name(&request.owner, &request.repository, request.job_id, 1);
    let message = IdleWatchMessage {
        execution_ref: name.clone(),
        owner: request.owner.clone(),
        repo: request.repository.clone(),
        identity: request.installation,
        max_idle_seconds: MAX_IDLE,
    };
    store
        .create_if_absent(ExecutionRecord::new(name, 1, request, selection("pool"), t0()))
        .await
        .unwrap();

    let watcher = IdleWatcher::new(
        store.clone(),
        broker.clone(),
        RunnerLevel::Repository,
        Arc::new(ManualClock::new(t0())),
    );
    Fixture {
        watcher,
        store,
        broker,
        message,
    }
}

fn after(secs: u64) -> Timestamp {
    t0().plus(Duration::from_secs(secs))
}

#[tokio::test]
async fn worker_idle_past_threshold_is_cancelled_and_deleted_once() {
    let f = fixture().await;
    f.broker.register(idle_worker(&f.message.execution_ref, t0()));

    let decision = f.watcher.handle(&f.message, after(MAX_IDLE + 1)).await.unwrap();

    assert_eq!(decision, IdleDecision::Reclaimed);
    assert_eq!(f.broker.deleted(), vec![f.message.execution_ref.clone()]);
    let record = f.store.get(&f.message.execution_ref).await.unwrap().unwrap();
    assert_eq!(record.cancel.unwrap().reason, IDLE_CANCEL_REASON);
    assert_eq!(record.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn worker_idle_exactly_at_threshold_is_left_alone() {
    let f = fixture().await;
    f.broker.register(idle_worker(&f.message.execution_ref, t0()));

    let decision = f.watcher.handle(&f.message, after(MAX_IDLE)).await.unwrap();

    assert_eq!(decision, IdleDecision::Retry);
    assert!(f.broker.deleted().is_empty());
    let record = f.store.get(&f.message.execution_ref).await.unwrap().unwrap();
    assert!(record.cancel.is_none());
}

#[tokio::test]
async fn busy_worker_is_retried() {
    let f = fixture().await;
    let mut worker = idle_worker(&f.message.execution_ref, t0());
    worker.busy = true;
    f.broker.register(worker);

    let decision = f.watcher.handle(&f.message, after(3600)).await.unwrap();

    assert_eq!(decision, IdleDecision::Retry);
    assert!(f.broker.deleted().is_empty());
}

#[tokio::test]
async fn unregistered_worker_is_retried() {
    let f = fixture().await;
    let decision = f.watcher.handle(&f.message, after(3600)).await.unwrap();
    assert_eq!(decision, IdleDecision::Retry);
}

#[tokio::test]
async fn missing_marker_is_retried() {
    let f = fixture().await;
    let mut worker = idle_worker(&f.message.execution_ref, t0());
    worker.started_at = None;
    f.broker.register(worker);

    let decision = f.watcher.handle(&f.message, after(3600)).await.unwrap();

    assert_eq!(decision, IdleDecision::Retry);
    assert!(f.broker.deleted().is_empty());
}

#[tokio::test]
async fn concluded_execution_drops_the_message() {
    let f = fixture().await;
    let mut record = f.store.get(&f.message.execution_ref).await.unwrap().unwrap();
    record.conclude(ExecutionStatus::Succeeded, t0());
    f.store.put(record).await.unwrap();
    f.broker.register(idle_worker(&f.message.execution_ref, t0()));

    let decision = f.watcher.handle(&f.message, after(3600)).await.unwrap();

    assert_eq!(decision, IdleDecision::Drop);
    assert!(f.broker.deleted().is_empty());
}

#[tokio::test]
async fn busy_delete_is_retried() {
    let f = fixture().await;
    f.broker.register(idle_worker(&f.message.execution_ref, t0()));
    f.broker.fail_deletes([ProviderError::WorkerBusy {
        name: f.message.execution_ref.to_string(),
    }]);

    let decision = f.watcher.handle(&f.message, after(3600)).await.unwrap();

    assert_eq!(decision, IdleDecision::Retry);
    assert!(f.broker.deleted().is_empty());
    // The cancellation written before the delete stays on the record.
    let record = f.store.get(&f.message.execution_ref).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    let cancel = record.cancel.expect("cancel stays pending");
    assert_eq!(cancel.reason, IDLE_CANCEL_REASON);
    assert_eq!(cancel.requested_at, after(3600));
}

#[tokio::test]
async fn batch_reports_only_messages_needing_retry() {
    let f = fixture().await;
    f.broker.register(idle_worker(&f.message.execution_ref, t0()));
    let mut orphan = f.message.clone();
    orphan.execution_ref = dispatch::ExecutionName::new("acme-svc-1").unwrap();
    let mut failing = f.message.clone();
    failing.execution_ref = dispatch::ExecutionName::new("acme-svc-2").unwrap();
    f.store
        .create_if_absent(ExecutionRecord::new(
            failing.execution_ref.clone(),
            1,
            job_request(2),
            selection("pool"),
            t0(),
        ))
        .await
        .unwrap();
    f.broker.fail_deletes([ProviderError::Unavailable {
        message: "boom".to_string(),
    }]);
    f.broker.register(idle_worker(
        &failing.execution_ref,
        t0().minus(Duration::from_secs(3600)),
    ));

    // "a" is still within its threshold, "b" has no record, "c" fails to delete.
    let retry = f
        .watcher
        .handle_batch(
            vec![("a", f.message.clone()), ("b", orphan), ("c", failing)],
            Duration::from_secs(5),
        )
        .await;

    assert_eq!(retry, vec!["a", "c"]);
}
