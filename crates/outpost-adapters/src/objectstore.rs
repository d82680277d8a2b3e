//! Object-store destination provider (`destination.type == "object_store"`).
//!
//! Models writing each event as one object keyed by event id under an
//! optional prefix, the way an S3-shaped sink would. As with
//! [`crate::broker`], the actual client for the backing store is an
//! external collaborator; `publish` computes the object key the
//! real client would write to and reports success once validation has
//! confirmed a bucket and credentials are present.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use outpost_provider::{BasePublisher, PreprocessOptions, Provider, Publisher, Target};
use outpost_types::{
    Delivery, DeliveryStatus, DeliveryTask, Destination, OutpostError, Result, ValidationError,
    ValidationErrorKind,
};

const CONFIG_BUCKET: &str = "bucket";
const CONFIG_PREFIX: &str = "prefix";
const CONFIG_REGION: &str = "region";
const CRED_ACCESS_KEY_ID: &str = "access_key_id";
const CRED_SECRET_ACCESS_KEY: &str = "secret_access_key";

const ALLOWED_CONFIG: &[&str] = &[CONFIG_BUCKET, CONFIG_PREFIX, CONFIG_REGION];
const ALLOWED_CREDENTIALS: &[&str] = &[CRED_ACCESS_KEY_ID, CRED_SECRET_ACCESS_KEY];
const DEFAULT_REGION: &str = "us-east-1";

/// `Provider` for a generic S3-shaped object-store destination.
pub struct ObjectStoreProvider;

impl ObjectStoreProvider {
    pub fn new() -> Self {
        Self
    }

    fn bucket(&self, destination: &Destination) -> Option<&str> {
        destination.config.get(CONFIG_BUCKET).map(String::as_str)
    }

    fn object_key(&self, destination: &Destination, event_id: &str) -> String {
        match destination.config.get(CONFIG_PREFIX) {
            Some(prefix) if !prefix.is_empty() => format!("{}/{event_id}.json", prefix.trim_end_matches('/')),
            _ => format!("{event_id}.json"),
        }
    }
}

impl Default for ObjectStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for ObjectStoreProvider {
    fn destination_type(&self) -> &'static str {
        "object_store"
    }

    fn validate(&self, destination: &Destination) -> Result<()> {
        let mut errors = Vec::new();
        if self.bucket(destination).unwrap_or_default().is_empty() {
            errors.push(ValidationError::new("config.bucket", ValidationErrorKind::Required));
        }
        if !destination.credentials.contains_key(CRED_ACCESS_KEY_ID) {
            errors.push(ValidationError::new(
                "credentials.access_key_id",
                ValidationErrorKind::Required,
            ));
        }
        if !destination.credentials.contains_key(CRED_SECRET_ACCESS_KEY) {
            errors.push(ValidationError::new(
                "credentials.secret_access_key",
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
        if !destination.config.contains_key(CONFIG_REGION) {
            destination.config.insert(CONFIG_REGION.to_string(), DEFAULT_REGION.to_string());
        }
        destination.config.retain(|k, _| ALLOWED_CONFIG.contains(&k.as_str()));
        destination.credentials.retain(|k, _| ALLOWED_CREDENTIALS.contains(&k.as_str()));
        Ok(())
    }

    fn compute_target(&self, destination: &Destination) -> Target {
        match self.bucket(destination) {
            Some(bucket) => {
                let prefix = destination.config.get(CONFIG_PREFIX).cloned().unwrap_or_default();
                Target::new(format!("s3://{bucket}/{prefix}"))
            }
            None => Target::new("(no bucket configured)"),
        }
    }

    async fn create_publisher(&self, destination: &Destination) -> Result<Arc<dyn Publisher>> {
        self.validate(destination)?;
        Ok(Arc::new(ObjectStorePublisher {
            bucket: self.bucket(destination).unwrap_or_default().to_string(),
            prefix: destination.config.get(CONFIG_PREFIX).cloned(),
            base: BasePublisher::new(),
        }))
    }
}

struct ObjectStorePublisher {
    bucket: String,
    prefix: Option<String>,
    base: BasePublisher,
}

#[async_trait]
impl Publisher for ObjectStorePublisher {
    async fn publish(&self, task: &DeliveryTask) -> Result<Delivery> {
        let _guard = self.base.start_publish()?;

        let key = match &self.prefix {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/{}.json", prefix.trim_end_matches('/'), task.event.id)
            }
            _ => format!("{}.json", task.event.id),
        };
        tracing::info!(
            destination_id = %task.destination_id,
            event_id = %task.event.id,
            bucket = %self.bucket,
            key,
            "object store publish"
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
            response_body: Some(format!("s3://{}/{key}", self.bucket)),
        })
    }

    async fn close(&self) {
        self.base.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_provider::Role;
    use outpost_types::{Event, TopicSet};
    use std::collections::BTreeMap;

    fn destination() -> Destination {
        let now = Utc::now();
        let mut config = BTreeMap::new();
        config.insert(CONFIG_BUCKET.to_string(), "outpost-events".to_string());
        config.insert(CONFIG_PREFIX.to_string(), "delivered".to_string());
        let mut credentials = BTreeMap::new();
        credentials.insert(CRED_ACCESS_KEY_ID.to_string(), "AKIA...".to_string());
        credentials.insert(CRED_SECRET_ACCESS_KEY.to_string(), "secret".to_string());
        Destination {
            id: "dest_store".into(),
            tenant_id: "tenant_1".into(),
            destination_type: "object_store".into(),
            topics: TopicSet::Wildcard,
            filter: None,
            config,
            credentials,
            delivery_metadata: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            disabled_at: None,
            deleted_at: None,
        }
    }

    fn task(destination_id: &str) -> DeliveryTask {
        DeliveryTask {
            event: Event {
                id: "evt_1".into(),
                tenant_id: "tenant_1".into(),
                destination_id: None,
                topic: "user.created".into(),
                time: Utc::now(),
                metadata: BTreeMap::new(),
                data: serde_json::json!({"hello": "world"}),
                eligible_for_retry: true,
                telemetry: None,
            },
            destination_id: destination_id.to_string(),
            attempt: 0,
            manual: false,
            manual_nonce: None,
            telemetry: None,
        }
    }

    #[test]
    fn validate_requires_bucket_and_credentials() {
        let provider = ObjectStoreProvider::new();
        let mut dest = destination();
        dest.config.remove(CONFIG_BUCKET);
        dest.credentials.clear();
        let err = provider.validate(&dest).unwrap_err();
        match err {
            OutpostError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn preprocess_defaults_region() {
        let provider = ObjectStoreProvider::new();
        let mut dest = destination();
        provider
            .preprocess(&mut dest, None, PreprocessOptions { role: Role::Admin })
            .unwrap();
        assert_eq!(dest.config.get(CONFIG_REGION).unwrap(), DEFAULT_REGION);
    }

    #[tokio::test]
    async fn publish_reports_computed_key() {
        let provider = ObjectStoreProvider::new();
        let dest = destination();
        let publisher = provider.create_publisher(&dest).await.unwrap();
        let delivery = publisher.publish(&task(&dest.id)).await.unwrap();
        assert!(delivery.is_success());
        assert_eq!(
            delivery.response_body.as_deref(),
            Some("s3://outpost-events/delivered/evt_1.json")
        );
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let provider = ObjectStoreProvider::new();
        let dest = destination();
        let publisher = provider.create_publisher(&dest).await.unwrap();
        publisher.close().await;
        let err = publisher.publish(&task(&dest.id)).await.unwrap_err();
        assert!(matches!(err, OutpostError::PublisherClosed));
    }
}
