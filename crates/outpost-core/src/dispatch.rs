//! Glues the pieces together:
//!
//! ```text
//! ingestion -> Event -> MatchEvent -> []DestinationSummary
//!   -> DeliveryTask (one per match) -> MessageQueue
//!   -> [consumer] -> Destination lookup -> Provider::create_publisher
//!   -> Publisher::publish -> Delivery -> DeliveryLog / retry reschedule
//! ```
//!
//! `Dispatcher` is the ingestion-side half; `Consumer` is the delivery
//! side. Both are thin — the real work lives in `outpost-store` (matching,
//! lookup) and `outpost-provider`/`outpost-webhook`/`outpost-adapters`
//! (publishing). This module's only job is wiring them to the MQ and log
//! seams in order.

use std::sync::Arc;
use std::time::Duration;

use outpost_provider::ProviderRegistry;
use outpost_retry::{calculate_delay, DeliveryTaskExt, RetryStrategyConfig};
use outpost_store::Store;
use outpost_types::{Delivery, Event, OutpostError, Result};

use crate::log::DeliveryLog;
use crate::queue::MessageQueue;
use crate::retry_scheduler::RetryScheduler;

/// Ingestion-side: resolves an `Event` to its matching destinations and
/// emits one `DeliveryTask` per match onto the queue. Returns once the
/// tasks are persisted to the queue, not once they're delivered.
pub struct Dispatcher {
    store: Arc<Store>,
    queue: Arc<dyn MessageQueue>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { store, queue }
    }

    /// Match `event` against its tenant's destinations and enqueue one
    /// automatic `DeliveryTask` per match. Returns the number enqueued.
    pub async fn ingest(&self, event: Event) -> Result<usize> {
        let matches = self.store.match_event(&event).await?;
        for summary in &matches {
            let task = outpost_types::DeliveryTask {
                event: event.clone(),
                destination_id: summary.id.clone(),
                attempt: 0,
                manual: false,
                manual_nonce: None,
                telemetry: event.telemetry.clone(),
            };
            self.queue.enqueue(task).await?;
        }
        tracing::info!(event_id = %event.id, matched = matches.len(), "event dispatched");
        Ok(matches.len())
    }
}

/// Delivery-side: looks up the destination a task targets, builds a
/// publisher for it, publishes, records the outcome, and reschedules a
/// retry on failure.
pub struct Consumer {
    store: Arc<Store>,
    registry: Arc<ProviderRegistry>,
    log: Arc<dyn DeliveryLog>,
    retry_scheduler: Arc<dyn RetryScheduler>,
    retry_policy: RetryStrategyConfig,
    max_attempts: u32,
}

impl Consumer {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ProviderRegistry>,
        log: Arc<dyn DeliveryLog>,
        retry_scheduler: Arc<dyn RetryScheduler>,
    ) -> Self {
        Self {
            store,
            registry,
            log,
            retry_scheduler,
            retry_policy: RetryStrategyConfig::default(),
            max_attempts: 10,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryStrategyConfig) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Process one `DeliveryTask` end to end: lookup, publish, log, and
    /// (on failure, if eligible) reschedule. Always returns the
    /// `Delivery` record produced, even on a failed attempt — only a
    /// lookup/publisher-construction error short-circuits before one
    /// exists.
    pub async fn process_task(&self, task: outpost_types::DeliveryTask) -> Result<Delivery> {
        let destination = self
            .store
            .retrieve_destination(&task.event.tenant_id, &task.destination_id)
            .await?;

        let provider = self
            .registry
            .get(&destination.destination_type)
            .ok_or_else(|| OutpostError::DestinationNotFound(destination.id.clone()))?;

        let publisher = provider.create_publisher(&destination).await?;
        let delivery = publisher.publish(&task).await?;
        self.log.record(delivery.clone()).await?;

        if !delivery.is_success() && task.event.eligible_for_retry && task.attempt + 1 < self.max_attempts {
            let slot = task.retry_id();
            let delay = calculate_delay(&self.retry_policy, task.attempt + 1);
            let mut next = task.clone();
            next.attempt += 1;
            next.manual = false;
            next.manual_nonce = None;
            tracing::warn!(
                destination_id = %task.destination_id,
                event_id = %task.event.id,
                attempt = task.attempt,
                delay_ms = delay.as_millis() as u64,
                "delivery failed, scheduling retry"
            );
            self.retry_scheduler.schedule(slot, next, delay).await;
        }

        Ok(delivery)
    }

    /// Manually replay a delivery. Builds a task with a fresh nonce (so
    /// repeated manual replays don't deduplicate against each other under
    /// the `IdempotencyKey` rule) and schedules it immediately under the
    /// same `RetryID` the automatic retry for this `(event, destination)`
    /// would use — cancelling that pending automatic retry.
    pub async fn replay(&self, event: &Event, destination_id: &str, attempt: u32) {
        let task = outpost_types::DeliveryTask {
            event: event.clone(),
            destination_id: destination_id.to_string(),
            attempt,
            manual: true,
            manual_nonce: Some(format!("nonce_{}", uuid::Uuid::new_v4())),
            telemetry: event.telemetry.clone(),
        };
        self.retry_scheduler.schedule(task.retry_id(), task, Duration::ZERO).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryDeliveryLog;
    use crate::queue::InMemoryQueue;
    use crate::retry_scheduler::InMemoryRetryScheduler;
    use chrono::Utc;
    use outpost_adapters::MessageBrokerProvider;
    use outpost_cipher::NoopCipher;
    use outpost_kv::InMemoryKv;
    use outpost_types::{Destination, TopicSet};
    use std::collections::BTreeMap;

    async fn seeded_store() -> Arc<Store> {
        let kv = Arc::new(InMemoryKv::new());
        let cipher = Arc::new(NoopCipher);
        let store = Arc::new(Store::new(kv, cipher));
        store.upsert_tenant("tenant_1", BTreeMap::new()).await.unwrap();
        store
    }

    fn broker_destination(id: &str, topics: TopicSet) -> Destination {
        let now = Utc::now();
        let mut config = BTreeMap::new();
        config.insert("url".to_string(), "amqp://broker.internal".to_string());
        Destination {
            id: id.to_string(),
            tenant_id: "tenant_1".into(),
            destination_type: "broker".into(),
            topics,
            filter: None,
            config,
            credentials: BTreeMap::new(),
            delivery_metadata: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            disabled_at: None,
            deleted_at: None,
        }
    }

    fn event(tenant_id: &str, topic: &str) -> Event {
        Event {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.to_string(),
            destination_id: None,
            topic: topic.to_string(),
            time: Utc::now(),
            metadata: BTreeMap::new(),
            data: serde_json::json!({"hello": "world"}),
            eligible_for_retry: true,
            telemetry: None,
        }
    }

    #[tokio::test]
    async fn ingest_enqueues_one_task_per_matching_destination() {
        let store = seeded_store().await;
        store
            .create_destination(broker_destination("dest_wild", TopicSet::Wildcard))
            .await
            .unwrap();
        store
            .create_destination(broker_destination(
                "dest_created",
                TopicSet::new(vec!["user.created".to_string()]).unwrap(),
            ))
            .await
            .unwrap();
        store
            .create_destination(broker_destination(
                "dest_deleted",
                TopicSet::new(vec!["user.deleted".to_string()]).unwrap(),
            ))
            .await
            .unwrap();

        let queue = Arc::new(InMemoryQueue::new());
        let dispatcher = Dispatcher::new(store, queue.clone());
        let matched = dispatcher.ingest(event("tenant_1", "user.created")).await.unwrap();

        assert_eq!(matched, 2);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn process_task_delivers_and_logs() {
        let store = seeded_store().await;
        let dest = broker_destination("dest_wild", TopicSet::Wildcard);
        store.create_destination(dest.clone()).await.unwrap();

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MessageBrokerProvider::new()));

        let queue = Arc::new(InMemoryQueue::new());
        let log = Arc::new(InMemoryDeliveryLog::new());
        let scheduler = Arc::new(InMemoryRetryScheduler::new(queue.clone()));
        let consumer = Consumer::new(store, Arc::new(registry), log.clone(), scheduler);

        let task = outpost_types::DeliveryTask {
            event: event("tenant_1", "user.created"),
            destination_id: dest.id.clone(),
            attempt: 0,
            manual: false,
            manual_nonce: None,
            telemetry: None,
        };
        let delivery = consumer.process_task(task).await.unwrap();
        assert!(delivery.is_success());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn process_task_reschedules_on_failure() {
        let store = seeded_store().await;
        // No provider registered for this destination type, so lookup
        // of the provider fails and we short-circuit before any
        // delivery. Use a dummy failing provider instead to exercise
        // the reschedule path end to end.
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl outpost_provider::Provider for AlwaysFails {
            fn destination_type(&self) -> &'static str {
                "always_fails"
            }
            fn validate(&self, _destination: &Destination) -> Result<()> {
                Ok(())
            }
            fn preprocess(
                &self,
                _destination: &mut Destination,
                _original: Option<&Destination>,
                _opts: outpost_provider::PreprocessOptions,
            ) -> Result<()> {
                Ok(())
            }
            fn compute_target(&self, _destination: &Destination) -> outpost_provider::Target {
                outpost_provider::Target::new("nowhere")
            }
            async fn create_publisher(
                &self,
                _destination: &Destination,
            ) -> Result<Arc<dyn outpost_provider::Publisher>> {
                Ok(Arc::new(FailingPublisher))
            }
        }
        struct FailingPublisher;
        #[async_trait::async_trait]
        impl outpost_provider::Publisher for FailingPublisher {
            async fn publish(&self, task: &outpost_types::DeliveryTask) -> Result<Delivery> {
                Ok(Delivery {
                    id: "del_fail".into(),
                    tenant_id: task.event.tenant_id.clone(),
                    event_id: task.event.id.clone(),
                    destination_id: task.destination_id.clone(),
                    attempt: task.attempt,
                    manual: task.manual,
                    status: outpost_types::DeliveryStatus::Failed,
                    time: Utc::now(),
                    response_code: Some(500),
                    response_body: None,
                })
            }
            async fn close(&self) {}
        }

        let mut dest = broker_destination("dest_wild", TopicSet::Wildcard);
        dest.destination_type = "always_fails".to_string();
        store.create_destination(dest.clone()).await.unwrap();

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(AlwaysFails));

        let queue = Arc::new(InMemoryQueue::new());
        let log = Arc::new(InMemoryDeliveryLog::new());
        let scheduler = Arc::new(InMemoryRetryScheduler::new(queue.clone()));
        let consumer = Consumer::new(store, Arc::new(registry), log.clone(), scheduler)
            .with_retry_policy(RetryStrategyConfig {
                base_delay: Duration::from_millis(5),
                ..RetryStrategyConfig::default()
            });

        let task = outpost_types::DeliveryTask {
            event: event("tenant_1", "user.created"),
            destination_id: dest.id.clone(),
            attempt: 0,
            manual: false,
            manual_nonce: None,
            telemetry: None,
        };
        let delivery = consumer.process_task(task).await.unwrap();
        assert!(!delivery.is_success());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len().await, 1);
        let rescheduled = queue.dequeue().await.unwrap();
        assert_eq!(rescheduled.attempt, 1);
    }
}
