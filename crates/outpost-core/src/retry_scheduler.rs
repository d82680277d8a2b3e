//! `RetryID`-keyed scheduling slot: a manual retry of a failed
//! destination uses the same `RetryID` as the pending
//! automatic retry, cancelling it, so at most one attempt is ever
//! in-flight per `(event, destination)`. `InMemoryRetryScheduler` is the
//! reference implementation — a real deployment would schedule on the MQ
//! itself (a delayed-delivery feature or a timer service), which is why
//! this trait takes a plain delay rather than assuming any particular
//! timer primitive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use outpost_types::DeliveryTask;
use tokio::task::JoinHandle;

use crate::queue::MessageQueue;

#[async_trait]
pub trait RetryScheduler: Send + Sync {
    /// Schedule `task` to be enqueued onto the `MessageQueue` after
    /// `delay`. Scheduling a new task under a `retry_id` that already has
    /// one pending cancels the previous one.
    async fn schedule(&self, retry_id: String, task: DeliveryTask, delay: Duration);

    /// Cancel any pending retry under `retry_id`. A no-op if none exists.
    async fn cancel(&self, retry_id: &str);
}

/// Single-process reference scheduler: one `tokio` task per pending
/// retry slot, keyed by `RetryID`.
pub struct InMemoryRetryScheduler {
    queue: Arc<dyn MessageQueue>,
    pending: DashMap<String, JoinHandle<()>>,
}

impl InMemoryRetryScheduler {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            queue,
            pending: DashMap::new(),
        }
    }

    /// Number of retry slots currently pending. Exposed for tests that
    /// assert cancellation actually removed a slot rather than merely
    /// racing it.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl RetryScheduler for InMemoryRetryScheduler {
    async fn schedule(&self, retry_id: String, task: DeliveryTask, delay: Duration) {
        if let Some((_, previous)) = self.pending.remove(&retry_id) {
            previous.abort();
            tracing::info!(retry_id, "cancelled pending retry in favor of a newer one");
        }

        let queue = self.queue.clone();
        let slot_key = retry_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = queue.enqueue(task).await {
                tracing::warn!(error = %err, "failed to enqueue scheduled retry");
            }
        });
        self.pending.insert(slot_key, handle);
    }

    async fn cancel(&self, retry_id: &str) {
        if let Some((_, handle)) = self.pending.remove(retry_id) {
            handle.abort();
        }
    }
}
