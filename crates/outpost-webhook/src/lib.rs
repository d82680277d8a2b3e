//! HTTP webhook destination providers.
//!
//! Two variants share one publisher implementation and differ only in
//! their `SignatureManager` wiring and header prefix: `standard()` is the
//! Standard Webhooks-compatible provider (`webhook-*` headers, `v1,<b64>`
//! signatures), `classic()` is the Outpost-native format (`x-outpost-*`
//! headers, a template-driven signature header). Both implement
//! `outpost_provider::Provider`/`Publisher` and build on
//! `outpost_provider::BasePublisher` for close-draining.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use outpost_provider::{BasePublisher, PreprocessOptions, Provider, Publisher, Role, Target};
use outpost_signature::{Secret, SecretSet, SignatureManager};
use outpost_types::{
    Delivery, DeliveryStatus, DeliveryTask, Destination, OutpostError, Result, ValidationError,
    ValidationErrorKind,
};

/// Headers a destination's custom config may never override — they are
/// either set by the HTTP client itself or by this publisher.
const RESERVED_HEADERS: &[&str] = &["content-type", "content-length", "host", "connection", "user-agent"];

const CONFIG_URL: &str = "url";
const CONFIG_HEADERS: &str = "headers";
const CRED_SECRET: &str = "secret";
const CRED_PREVIOUS_SECRET: &str = "previous_secret";
const CRED_PREVIOUS_SECRET_INVALID_AT: &str = "previous_secret_invalid_at";
const CRED_ROTATE_SECRET: &str = "rotate_secret";

/// Outbound HTTP client tuning, independent of any one destination.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: Option<String>,
    pub proxy_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: Some(concat!("outpost-webhook/", env!("CARGO_PKG_VERSION")).to_string()),
            proxy_url: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

fn build_client(config: &HttpClientConfig) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
    if let Some(ua) = &config.user_agent {
        builder = builder.user_agent(ua);
    }
    if let Some(proxy) = &config.proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    builder.build()
}

/// Which wire format this provider instance speaks.
#[derive(Clone)]
enum Variant {
    /// `webhook-*` headers, `v1,<b64>` Standard Webhooks signatures.
    Standard,
    /// `x-outpost-*` headers, template-driven classic signatures.
    Classic,
}

impl Variant {
    fn destination_type(&self) -> &'static str {
        match self {
            Variant::Standard => "webhook",
            Variant::Classic => "webhook_classic",
        }
    }

    fn header_prefix(&self) -> &'static str {
        match self {
            Variant::Standard => "webhook-",
            Variant::Classic => "x-outpost-",
        }
    }

    fn signature_manager(&self) -> SignatureManager {
        match self {
            Variant::Standard => SignatureManager::standard_webhooks(),
            Variant::Classic => SignatureManager::classic(
                "{Timestamp}.{EventID}.{Body}",
                "t={Timestamp},v1={Signature}",
                " ",
                Arc::new(outpost_signature::HmacSha256),
                Arc::new(outpost_signature::Base64Encoder),
            ),
        }
    }
}

/// `Provider` implementation for HTTP webhook destinations.
pub struct WebhookProvider {
    variant: Variant,
    client: reqwest::Client,
}

impl WebhookProvider {
    fn new(variant: Variant, http_config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = build_client(&http_config)?;
        Ok(Self { variant, client })
    }

    /// Standard Webhooks-compatible provider: `webhook-*` headers.
    pub fn standard(http_config: HttpClientConfig) -> anyhow::Result<Self> {
        Self::new(Variant::Standard, http_config)
    }

    /// Classic Outpost provider: `x-outpost-*` headers.
    pub fn classic(http_config: HttpClientConfig) -> anyhow::Result<Self> {
        Self::new(Variant::Classic, http_config)
    }

    fn url(&self, destination: &Destination) -> Option<String> {
        destination.config.get(CONFIG_URL).cloned()
    }

    fn custom_headers(&self, destination: &Destination) -> BTreeMap<String, String> {
        let Some(raw) = destination.config.get(CONFIG_HEADERS) else {
            return BTreeMap::new();
        };
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) else {
            return BTreeMap::new();
        };
        map.into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .filter(|(k, _)| !RESERVED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
            .collect()
    }

    fn secret_set(&self, destination: &Destination) -> anyhow::Result<SecretSet> {
        let raw = destination
            .credentials
            .get(CRED_SECRET)
            .ok_or_else(|| anyhow::anyhow!("missing {CRED_SECRET} credential"))?;
        let current = Secret::parse(raw, destination.created_at)?;
        match (
            destination.credentials.get(CRED_PREVIOUS_SECRET),
            destination.credentials.get(CRED_PREVIOUS_SECRET_INVALID_AT),
        ) {
            (Some(previous_raw), Some(invalid_at_raw)) => {
                let previous = Secret::parse(previous_raw, destination.created_at)?;
                let invalid_at = chrono::DateTime::parse_from_rfc3339(invalid_at_raw)?.with_timezone(&Utc);
                Ok(SecretSet::with_previous(current, previous, invalid_at))
            }
            (Some(_), None) => {
                anyhow::bail!("{CRED_PREVIOUS_SECRET} requires {CRED_PREVIOUS_SECRET_INVALID_AT}")
            }
            (None, _) => Ok(SecretSet::new(current)),
        }
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn destination_type(&self) -> &'static str {
        self.variant.destination_type()
    }

    fn validate(&self, destination: &Destination) -> Result<()> {
        let mut errors = Vec::new();

        match self.url(destination) {
            None => errors.push(ValidationError::new("config.url", ValidationErrorKind::Required)),
            Some(url) => {
                if reqwest::Url::parse(&url).is_err() {
                    errors.push(ValidationError::new("config.url", ValidationErrorKind::Pattern));
                }
            }
        }

        match destination.credentials.get(CRED_SECRET) {
            None => errors.push(ValidationError::new("credentials.secret", ValidationErrorKind::Required)),
            Some(secret) if Secret::parse(secret, Utc::now()).is_err() => {
                errors.push(ValidationError::new("credentials.secret", ValidationErrorKind::Pattern));
            }
            _ => {}
        }

        let has_previous = destination.credentials.contains_key(CRED_PREVIOUS_SECRET);
        let has_invalid_at = destination.credentials.contains_key(CRED_PREVIOUS_SECRET_INVALID_AT);
        if has_previous && !has_invalid_at {
            errors.push(ValidationError::new(
                "credentials.previous_secret_invalid_at",
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
        original: Option<&Destination>,
        opts: PreprocessOptions,
    ) -> Result<()> {
        let rotate_requested = destination
            .credentials
            .remove(CRED_ROTATE_SECRET)
            .map(|v| v == "true")
            .unwrap_or(false);

        if opts.role == Role::Tenant {
            if let Some(original) = original {
                let original_secret = original.credentials.get(CRED_SECRET).cloned();
                let incoming_secret = destination.credentials.get(CRED_SECRET).cloned();
                if !rotate_requested && incoming_secret.is_some() && incoming_secret != original_secret {
                    return Err(OutpostError::Validation(vec![ValidationError::new(
                        "credentials.secret",
                        ValidationErrorKind::Forbidden,
                    )]));
                }
            }
        }

        if rotate_requested {
            let previous_invalid_at = destination
                .credentials
                .get(CRED_PREVIOUS_SECRET_INVALID_AT)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let current = original
                .and_then(|o| o.credentials.get(CRED_SECRET).cloned())
                .or_else(|| destination.credentials.get(CRED_SECRET).cloned());
            if let Some(current) = current {
                let invalid_at = previous_invalid_at.unwrap_or_else(|| Utc::now() + chrono::Duration::hours(24));
                destination.credentials.insert(CRED_PREVIOUS_SECRET.to_string(), current);
                destination
                    .credentials
                    .insert(CRED_PREVIOUS_SECRET_INVALID_AT.to_string(), invalid_at.to_rfc3339());
            }
            destination
                .credentials
                .insert(CRED_SECRET.to_string(), Secret::generate(Utc::now()).to_whsec());
            tracing::info!(destination_id = %destination.id, "rotated webhook secret");
        } else if original.is_none() && !destination.credentials.contains_key(CRED_SECRET) {
            destination
                .credentials
                .insert(CRED_SECRET.to_string(), Secret::generate(Utc::now()).to_whsec());
        }

        let allowed_config: &[&str] = &[CONFIG_URL, CONFIG_HEADERS];
        destination.config.retain(|k, _| allowed_config.contains(&k.as_str()));
        let allowed_credentials: &[&str] = &[CRED_SECRET, CRED_PREVIOUS_SECRET, CRED_PREVIOUS_SECRET_INVALID_AT];
        destination.credentials.retain(|k, _| allowed_credentials.contains(&k.as_str()));

        Ok(())
    }

    fn compute_target(&self, destination: &Destination) -> Target {
        match self.url(destination) {
            Some(url) => Target::with_url(url.clone(), url),
            None => Target::new("(no url configured)"),
        }
    }

    async fn create_publisher(&self, destination: &Destination) -> Result<Arc<dyn Publisher>> {
        self.validate(destination)?;
        let url = self.url(destination).expect("validated");
        let secrets = self.secret_set(destination).map_err(|e| {
            tracing::warn!(destination_id = %destination.id, error = %e, "webhook publisher construction failed");
            OutpostError::Validation(vec![ValidationError::new("credentials.secret", ValidationErrorKind::Invalid)])
        })?;

        Ok(Arc::new(WebhookPublisher {
            client: self.client.clone(),
            url,
            header_prefix: self.variant.header_prefix(),
            signature_manager: self.variant.signature_manager(),
            secrets,
            custom_headers: self.custom_headers(destination),
            delivery_metadata: destination.delivery_metadata.clone(),
            base: BasePublisher::new(),
        }))
    }
}

/// Bound, ready-to-publish HTTP webhook destination.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
    header_prefix: &'static str,
    signature_manager: SignatureManager,
    /// Captured at construction time, immutable for the publisher's
    /// lifetime — a rotation only takes effect for publishers created
    /// after it.
    secrets: SecretSet,
    custom_headers: BTreeMap<String, String>,
    delivery_metadata: BTreeMap<String, String>,
    base: BasePublisher,
}

const RESPONSE_SNIPPET_LIMIT: usize = 2048;

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, task: &DeliveryTask) -> Result<Delivery> {
        let _guard = self.base.start_publish()?;

        let body = serde_json::to_vec(&task.event.data).map_err(|e| OutpostError::Serialization(e.to_string()))?;
        let body_str = String::from_utf8_lossy(&body).to_string();
        let now = Utc::now();
        let prefix = self.header_prefix;

        // Collected into a map first, rather than called on the request
        // builder directly, so a later write truly replaces an earlier
        // one of the same name instead of both riding along as separate
        // values: custom headers first, then system-prefixed ones, then
        // event/delivery metadata last so it wins any collision.
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in &self.custom_headers {
            headers.insert(key.to_ascii_lowercase(), value.clone());
        }

        let signature = self.signature_manager.sign(
            &self.secrets,
            now,
            &task.event.id,
            &task.event.topic,
            now,
            &body_str,
        );
        headers.insert(format!("{prefix}id").to_ascii_lowercase(), task.event.id.clone());
        headers.insert(format!("{prefix}timestamp").to_ascii_lowercase(), now.timestamp().to_string());
        if !signature.is_empty() {
            headers.insert(format!("{prefix}signature").to_ascii_lowercase(), signature);
        }

        for (key, value) in task.event.metadata.iter().chain(self.delivery_metadata.iter()) {
            headers.insert(format!("{prefix}{key}").to_ascii_lowercase(), value.clone());
        }

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        for (key, value) in &headers {
            request = request.header(key, value);
        }

        let delivery_base = |status, code: Option<u16>, response_body: Option<String>| Delivery {
            id: format!("del_{}", uuid::Uuid::new_v4()),
            tenant_id: task.event.tenant_id.clone(),
            event_id: task.event.id.clone(),
            destination_id: task.destination_id.clone(),
            attempt: task.attempt,
            manual: task.manual,
            status,
            time: now,
            response_code: code,
            response_body,
        };

        match request.body(body).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                let success = response.status().is_success();
                let text = response.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(RESPONSE_SNIPPET_LIMIT).collect();
                tracing::info!(
                    destination_id = %task.destination_id,
                    event_id = %task.event.id,
                    status = code,
                    success,
                    "webhook publish completed"
                );
                Ok(delivery_base(
                    if success { DeliveryStatus::Success } else { DeliveryStatus::Failed },
                    Some(code),
                    Some(snippet),
                ))
            }
            Err(err) => {
                tracing::warn!(destination_id = %task.destination_id, error = %err, "webhook publish transport failure");
                Ok(delivery_base(DeliveryStatus::Failed, None, Some(err.to_string())))
            }
        }
    }

    async fn close(&self) {
        self.base.close().await;
    }
}
