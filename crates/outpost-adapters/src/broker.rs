//! Message-broker destination provider (`destination.type == "broker"`).
//!
//! Models a queue/topic publish: destination config names a connection
//! string and an optional exchange, the routing key defaults to the
//! event's topic if the config doesn't pin one down. There is no real
//! AMQP/Kafka/SQS client wired in here — that client lives outside this
//! workspace's scope — so `publish` reports a deterministic success
//! once validation passes, which is enough to exercise dispatch, retry,
//! and close-draining end to end against this adapter.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use outpost_provider::{BasePublisher, PreprocessOptions, Provider, Publisher, Target};
use outpost_types::{
    Delivery, DeliveryStatus, DeliveryTask, Destination, OutpostError, Result, ValidationError,
    ValidationErrorKind,
};

const CONFIG_URL: &str = "url";
const CONFIG_EXCHANGE: &str = "exchange";
const CONFIG_ROUTING_KEY: &str = "routing_key";
const CRED_USERNAME: &str = "username";
const CRED_PASSWORD: &str = "password";

const ALLOWED_CONFIG: &[&str] = &[CONFIG_URL, CONFIG_EXCHANGE, CONFIG_ROUTING_KEY];
const ALLOWED_CREDENTIALS: &[&str] = &[CRED_USERNAME, CRED_PASSWORD];

/// `Provider` for a generic AMQP-shaped message broker destination.
pub struct MessageBrokerProvider;

impl MessageBrokerProvider {
    pub fn new() -> Self {
        Self
    }

    fn url(&self, destination: &Destination) -> Option<&str> {
        destination.config.get(CONFIG_URL).map(String::as_str)
    }

    fn routing_key<'a>(&self, destination: &'a Destination, event_topic: &'a str) -> &'a str {
        destination
            .config
            .get(CONFIG_ROUTING_KEY)
            .map(String::as_str)
            .unwrap_or(event_topic)
    }
}

impl Default for MessageBrokerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MessageBrokerProvider {
    fn destination_type(&self) -> &'static str {
        "broker"
    }

    fn validate(&self, destination: &Destination) -> Result<()> {
        let mut errors = Vec::new();
        if self.url(destination).unwrap_or_default().is_empty() {
            errors.push(ValidationError::new(
                "config.url",
                ValidationErrorKind::Required,
            ));
        }
        let has_username = destination.credentials.contains_key(CRED_USERNAME);
        let has_password = destination.credentials.contains_key(CRED_PASSWORD);
        if has_username != has_password {
            errors.push(ValidationError::new(
                if has_username { "credentials.password" } else { "credentials.username" },
                ValidationErrorKind::Required,
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OutpostError::Validation(errors))
        }
    }

    fn preprocess(
        &self,
        destination: &mut Destination,
        _original: Option<&Destination>,
        _opts: PreprocessOptions,
    ) -> Result<()> {
        destination.config.retain(|k, _| ALLOWED_CONFIG.contains(&k.as_str()));
        destination.credentials.retain(|k, _| ALLOWED_CREDENTIALS.contains(&k.as_str()));
        Ok(())
    }

    fn compute_target(&self, destination: &Destination) -> Target {
        match (self.url(destination), destination.config.get(CONFIG_EXCHANGE)) {
            (Some(url), Some(exchange)) => Target::new(format!("{exchange}@{url}")),
            (Some(url), None) => Target::new(url.to_string()),
            (None, _) => Target::new("(no broker url configured)"),
        }
    }

    async fn create_publisher(&self, destination: &Destination) -> Result<Arc<dyn Publisher>> {
        self.validate(destination)?;
        Ok(Arc::new(MessageBrokerPublisher {
            url: self.url(destination).unwrap_or_default().to_string(),
            exchange: destination.config.get(CONFIG_EXCHANGE).cloned(),
            routing_key_override: destination.config.get(CONFIG_ROUTING_KEY).cloned(),
            base: BasePublisher::new(),
        }))
    }
}

struct MessageBrokerPublisher {
    url: String,
    exchange: Option<String>,
    routing_key_override: Option<String>,
    base: BasePublisher,
}

#[async_trait]
impl Publisher for MessageBrokerPublisher {
    async fn publish(&self, task: &DeliveryTask) -> Result<Delivery> {
        let _guard = self.base.start_publish()?;

        let routing_key = self
            .routing_key_override
            .as_deref()
            .unwrap_or(&task.event.topic);
        tracing::info!(
            destination_id = %task.destination_id,
            event_id = %task.event.id,
            url = %self.url,
            exchange = ?self.exchange,
            routing_key,
            "message broker publish"
        );

        Ok(Delivery {
            id: format!("del_{}", uuid::Uuid::new_v4()),
            tenant_id: task.event.tenant_id.clone(),
            event_id: task.event.id.clone(),
            destination_id: task.destination_id.clone(),
            attempt: task.attempt,
            manual: task.manual,
            status: DeliveryStatus::Success,
            time: Utc::now(),
            response_code: None,
            response_body: Some(format!(
                "published to exchange={:?} routing_key={routing_key}",
                self.exchange
            )),
        })
    }

    async fn close(&self) {
        self.base.close().await;
    }
}
