//! `MessageQueue`: the generic external-collaborator seam the real
//! AMQP/Kafka/SQS transport plugs into. `InMemoryQueue` is the reference
//! implementation used by tests and single-process deployments.

use std::collections::VecDeque;

use async_trait::async_trait;
use outpost_types::{DeliveryTask, Result};
use tokio::sync::Mutex;

/// Generic outbound queue carrying `DeliveryTask`s from ingestion to the
/// delivery consumer. A real deployment backs this with AMQP/Kafka/SQS;
/// this workspace only defines the contract.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, task: DeliveryTask) -> Result<()>;

    /// Pop the next task, if any. A real MQ would block or long-poll;
    /// this trait leaves that choice to the implementation.
    async fn dequeue(&self) -> Option<DeliveryTask>;

    /// Number of tasks currently queued. Used by tests to assert fan-out
    /// counts without draining the queue.
    async fn len(&self) -> usize;
}

/// FIFO, single-process `MessageQueue` with no redelivery or at-least-once
/// guarantee of its own — a real MQ backend supplies that; this is purely
/// a reference implementation for tests and demos.
#[derive(Default)]
pub struct InMemoryQueue {
    tasks: Mutex<VecDeque<DeliveryTask>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn enqueue(&self, task: DeliveryTask) -> Result<()> {
        self.tasks.lock().await.push_back(task);
        Ok(())
    }

    async fn dequeue(&self) -> Option<DeliveryTask> {
        self.tasks.lock().await.pop_front()
    }

    async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}
