//! `DeliveryLog`: the generic external-collaborator seam the ClickHouse-
//! backed log archive plugs into. `InMemoryDeliveryLog` is the reference
//! implementation used by tests.

use async_trait::async_trait;
use outpost_types::{Delivery, Result};
use parking_lot::RwLock;

/// Durable record of delivery attempts, independent of the KV entity
/// store. A real deployment backs this with a columnar log archive; this
/// workspace defines only the write contract it's called with.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, delivery: Delivery) -> Result<()>;
}

/// In-memory reference `DeliveryLog`. Keeps every recorded delivery in
/// insertion order, for assertions in tests and demos.
#[derive(Default)]
pub struct InMemoryDeliveryLog {
    deliveries: RwLock<Vec<Delivery>>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.deliveries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.read().is_empty()
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn record(&self, delivery: Delivery) -> Result<()> {
        self.deliveries.write().push(delivery);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outpost_types::DeliveryStatus;

    fn delivery() -> Delivery {
        Delivery {
            id: "del_1".into(),
            tenant_id: "tenant_1".into(),
            event_id: "evt_1".into(),
            destination_id: "dest_1".into(),
            attempt: 0,
            manual: false,
            status: DeliveryStatus::Success,
            time: Utc::now(),
            response_code: Some(200),
            response_body: None,
        }
    }

    #[tokio::test]
    async fn records_accumulate_in_order() {
        let log = InMemoryDeliveryLog::new();
        log.record(delivery()).await.unwrap();
        let mut second = delivery();
        second.id = "del_2".into();
        log.record(second).await.unwrap();

        let recorded = log.deliveries();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].id, "del_1");
        assert_eq!(recorded[1].id, "del_2");
    }
}
