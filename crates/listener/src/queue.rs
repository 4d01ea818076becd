//! In-process delay queue for idle-watch messages, and its consumer loop.
//!
//! Messages become visible once their delay elapses. The consumer takes
//! batches of visible messages, hands them to [`IdleWatcher::handle_batch`]
//! and puts back only the messages that asked for a retry, after the retry
//! delay. Contents are lost on restart; the driver's own outcome still
//! concludes every execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use dispatch::{IdleWatchMessage, IdleWatchQueue, QueueError};
use lifecycle::IdleWatcher;

/// Consumer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleQueueConfig {
    /// Most messages handled per batch.
    pub batch_size: usize,
    /// Delay before a retried message becomes visible again, in seconds.
    pub retry_delay_secs: u64,
    /// Time allowed for one message, in seconds.
    pub message_timeout_secs: u64,
}

impl Default for IdleQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry_delay_secs: 60,
            message_timeout_secs: 30,
        }
    }
}

impl IdleQueueConfig {
    /// Delay before a retried message becomes visible again.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Time allowed for one message.
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Envelope {
    id: Uuid,
    visible_at: Instant,
    message: IdleWatchMessage,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<Envelope>,
    closed: bool,
}

/// A delay queue held in memory.
#[derive(Debug, Default)]
pub struct DelayQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DelayQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(
        &self,
        id: Uuid,
        message: IdleWatchMessage,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.pending.push(Envelope {
            id,
            visible_at: Instant::now() + delay,
            message,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for visible messages and removes up to `max` of them, earliest
    /// first. Returns `None` once the queue is closed.
    pub async fn next_batch(&self, max: usize) -> Option<Vec<(Uuid, IdleWatchMessage)>> {
        loop {
            let next_visible = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                let now = Instant::now();
                state.pending.sort_by_key(|e| e.visible_at);
                let ready = state
                    .pending
                    .iter()
                    .take_while(|e| e.visible_at <= now)
                    .count()
                    .min(max.max(1));
                if ready > 0 {
                    let batch = state
                        .pending
                        .drain(..ready)
                        .map(|e| (e.id, e.message))
                        .collect();
                    return Some(batch);
                }
                state.pending.first().map(|e| e.visible_at)
            };

            match next_visible {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Stops the queue; pending messages are discarded.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);
        self.notify.notify_waiters();
        self.notify.notify_one();
        debug!(dropped, "Idle-watch queue closed");
    }

    /// Number of messages waiting, visible or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Returns `true` if no message is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IdleWatchQueue for DelayQueue {
    async fn enqueue(&self, message: IdleWatchMessage, delay: Duration) -> Result<(), QueueError> {
        let id = Uuid::new_v4();
        debug!(
            message_id = %id,
            execution = %message.execution_ref,
            delay_secs = delay.as_secs(),
            "Idle watch scheduled"
        );
        self.push(id, message, delay).await
    }
}

// ---------------------------------------------------------------------------

/// Feeds queued messages to the idle watcher.
#[derive(Debug)]
pub struct IdleWatchConsumer {
    queue: Arc<DelayQueue>,
    watcher: Arc<IdleWatcher>,
    config: IdleQueueConfig,
}

impl IdleWatchConsumer {
    /// Creates the consumer.
    pub fn new(queue: Arc<DelayQueue>, watcher: Arc<IdleWatcher>, config: IdleQueueConfig) -> Self {
        Self {
            queue,
            watcher,
            config,
        }
    }

    /// Handles one batch and re-queues the messages that asked for a retry.
    /// Returns how many were re-queued.
    pub async fn process(&self, batch: Vec<(Uuid, IdleWatchMessage)>) -> usize {
        let mut messages: HashMap<Uuid, IdleWatchMessage> = batch
            .iter()
            .map(|(id, message)| (*id, message.clone()))
            .collect();
        let retry = self
            .watcher
            .handle_batch(batch, self.config.message_timeout())
            .await;

        let mut requeued = 0;
        for id in retry {
            let Some(message) = messages.remove(&id) else {
                continue;
            };
            match self.queue.push(id, message, self.config.retry_delay()).await {
                Ok(()) => requeued += 1,
                Err(err) => debug!(message_id = %id, error = %err, "Retry not re-queued"),
            }
        }
        requeued
    }

    /// Consumes until `shutdown` flips to `true` or the queue closes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(batch_size = self.config.batch_size, "Idle-watch consumer started");
        loop {
            tokio::select! {
                batch = self.queue.next_batch(self.config.batch_size) => {
                    let Some(batch) = batch else {
                        info!("Idle-watch queue closed");
                        return;
                    };
                    let handled = batch.len();
                    let requeued = self.process(batch).await;
                    debug!(handled, requeued, "Idle-watch batch processed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Idle-watch consumer stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
