use std::time::Duration;

use dispatch::{
    BackendId, ExecutionName, ExecutionRecord, ExecutionStore, InstallationId, JobId, JobRequest,
    LabelSet, Owner, RepositoryName, RunnerLevel, Selection, Timestamp,
};
use lifecycle::{MemoryExecutionStore, SystemClock};

use super::*;
use crate::testing::FakeBroker;

fn message(name: &str) -> IdleWatchMessage {
    IdleWatchMessage {
        execution_ref: ExecutionName::new(name).unwrap(),
        owner: Owner::new("acme").unwrap(),
        repo: RepositoryName::new("svc").unwrap(),
        identity: InstallationId::new(7),
        max_idle_seconds: 300,
    }
}

fn record(name: &str) -> ExecutionRecord {
    let request = JobRequest {
        owner: Owner::new("acme").unwrap(),
        repository: RepositoryName::new("svc").unwrap(),
        job_id: JobId::new(42),
        job_url: "https://github.com/acme/svc/actions/runs/9/job/42".to_string(),
        installation: InstallationId::new(7),
        labels: LabelSet::from_strs(["self-hosted", "linux"]),
        deployment: None,
        run_id: None,
        head_branch: None,
    };
    let selection = Selection {
        backend: BackendId::new("linux-pool").unwrap(),
        labels: LabelSet::from_strs(["linux"]),
    };
    ExecutionRecord::new(
        ExecutionName::new(name).unwrap(),
        1,
        request,
        selection,
        Timestamp::now(),
    )
}

fn consumer(queue: Arc<DelayQueue>, store: Arc<MemoryExecutionStore>) -> IdleWatchConsumer {
    let watcher = IdleWatcher::new(
        store,
        Arc::new(FakeBroker::default()),
        RunnerLevel::Repository,
        Arc::new(SystemClock),
    );
    IdleWatchConsumer::new(
        queue,
        Arc::new(watcher),
        IdleQueueConfig {
            batch_size: 10,
            retry_delay_secs: 60,
            message_timeout_secs: 5,
        },
    )
}

#[tokio::test]
async fn messages_stay_hidden_until_their_delay_elapses() {
    let queue = DelayQueue::new();
    queue
        .enqueue(message("late"), Duration::from_millis(200))
        .await
        .unwrap();
    queue
        .enqueue(message("early"), Duration::from_millis(20))
        .await
        .unwrap();

    let batch = queue.next_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].1.execution_ref.as_str(), "early");
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn batches_are_capped() {
    let queue = DelayQueue::new();
    for name in ["a", "b", "c"] {
        queue.enqueue(message(name), Duration::ZERO).await.unwrap();
    }
    let batch = queue.next_batch(2).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn waiting_consumer_wakes_on_enqueue() {
    let queue = Arc::new(DelayQueue::new());
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.next_batch(10).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.enqueue(message("a"), Duration::ZERO).await.unwrap();

    let batch = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn closed_queue_ends_consumers_and_refuses_messages() {
    let queue = Arc::new(DelayQueue::new());
    queue
        .enqueue(message("a"), Duration::from_secs(60))
        .await
        .unwrap();
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.next_batch(10).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close().await;

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_none());
    assert!(queue.is_empty().await);
    assert!(matches!(
        queue.enqueue(message("b"), Duration::ZERO).await,
        Err(QueueError::Closed)
    ));
}

#[tokio::test]
async fn concluded_executions_are_not_requeued() {
    let queue = Arc::new(DelayQueue::new());
    let store = Arc::new(MemoryExecutionStore::new());
    let consumer = consumer(queue.clone(), store);

    let requeued = consumer
        .process(vec![(Uuid::new_v4(), message("acme-svc-42"))])
        .await;
    assert_eq!(requeued, 0);
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn unregistered_worker_is_requeued_after_the_retry_delay() {
    let queue = Arc::new(DelayQueue::new());
    let store = Arc::new(MemoryExecutionStore::new());
    store.create_if_absent(record("acme-svc-42")).await.unwrap();
    let consumer = consumer(queue.clone(), store);

    let id = Uuid::new_v4();
    let requeued = consumer.process(vec![(id, message("acme-svc-42"))]).await;
    assert_eq!(requeued, 1);
    assert_eq!(queue.len().await, 1);

    // Hidden for the retry delay.
    let poll = tokio::time::timeout(Duration::from_millis(50), queue.next_batch(10)).await;
    assert!(poll.is_err());
}

#[tokio::test]
async fn consumer_stops_on_shutdown() {
    let queue = Arc::new(DelayQueue::new());
    let store = Arc::new(MemoryExecutionStore::new());
    let consumer = consumer(queue, store);
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(consumer.run(rx));
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}
