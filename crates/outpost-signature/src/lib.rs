//! Webhook signing core.
//!
//! Builds one HTTP header value per publish, carrying one signature per
//! still-valid secret, so a destination can rotate its signing secret
//! without dropping deliveries in flight. The signed-content template,
//! header format, algorithm, and encoder are all swappable, so the same
//! manager backs both the Standard Webhooks wire format and classic
//! Outpost's own.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

const WHSEC_PREFIX: &str = "whsec_";
const SECRET_BYTES: usize = 32;
const DEFAULT_ROTATION_WINDOW_HOURS: i64 = 24;

/// A single signing secret: the raw key bytes plus its validity window.
#[derive(Debug, Clone)]
pub struct Secret {
    pub key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
}

impl Secret {
    /// Generate a fresh 32-byte secret.
    pub fn generate(created_at: DateTime<Utc>) -> Self {
        let mut key = vec![0u8; SECRET_BYTES];
        rand::rng().fill_bytes(&mut key);
        Self { key, created_at, invalid_at: None }
    }

    /// Parse a `whsec_<base64>` secret string.
    pub fn parse(whsec: &str, created_at: DateTime<Utc>) -> Result<Self> {
        let encoded = whsec
            .strip_prefix(WHSEC_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("secret must start with {WHSEC_PREFIX}"))?;
        let key = BASE64
            .decode(encoded)
            .context("invalid base64 in whsec secret")?;
        Ok(Self { key, created_at, invalid_at: None })
    }

    pub fn to_whsec(&self) -> String {
        format!("{WHSEC_PREFIX}{}", BASE64.encode(&self.key))
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.invalid_at.map(|t| now < t).unwrap_or(true)
    }

    pub fn from_webhook_secret(secret: &outpost_types::WebhookSecret) -> Result<Self> {
        Self::parse(&secret.secret, secret.created_at)
    }
}

/// Current plus optional still-rotating previous secret.
#[derive(Debug, Clone)]
pub struct SecretSet {
    pub current: Secret,
    pub previous: Option<Secret>,
}

impl SecretSet {
    pub fn new(current: Secret) -> Self {
        Self { current, previous: None }
    }

    /// Build a set with an explicit previous secret. `previous_invalid_at`
    /// is required whenever `previous` is supplied.
    pub fn with_previous(current: Secret, previous: Secret, previous_invalid_at: DateTime<Utc>) -> Self {
        let previous = Secret { invalid_at: Some(previous_invalid_at), ..previous };
        Self { current, previous: Some(previous) }
    }

    /// Build a set from a persisted `WebhookSecret`, enforcing that a
    /// `previous_secret` never appears without `previous_secret_invalid_at`.
    pub fn from_webhook_secret(secret: &outpost_types::WebhookSecret) -> Result<Self> {
        let current = Secret::from_webhook_secret(secret)?;
        match (&secret.previous_secret, secret.previous_secret_invalid_at) {
            (Some(previous), Some(invalid_at)) => {
                let previous = Secret::parse(previous, secret.created_at)?;
                Ok(Self::with_previous(current, previous, invalid_at))
            }
            (Some(_), None) => {
                anyhow::bail!("previous_secret requires previous_secret_invalid_at")
            }
            (None, _) => Ok(Self::new(current)),
        }
    }

    /// Current first, then previous if it's still inside its rotation
    /// window — current-first ordering keeps header position stable
    /// across a rotation (`v1,<b64-0> v1,<b64-1>`, index 0 is current).
    pub fn active(&self, now: DateTime<Utc>) -> Vec<&Secret> {
        let mut out = Vec::with_capacity(2);
        if self.current.is_active(now) {
            out.push(&self.current);
        }
        if let Some(previous) = &self.previous {
            if previous.is_active(now) {
                out.push(previous);
            }
        }
        out
    }

    /// Roll `current` into `previous` with a rotation window, and
    /// install `new_secret` as the new current. `previous_invalid_at`
    /// defaults to `now + 24h` when not supplied.
    pub fn rotate(&mut self, new_secret: Secret, now: DateTime<Utc>, previous_invalid_at: Option<DateTime<Utc>>) {
        let invalid_at = previous_invalid_at.unwrap_or_else(|| now + ChronoDuration::hours(DEFAULT_ROTATION_WINDOW_HOURS));
        let retiring = Secret { invalid_at: Some(invalid_at), ..self.current.clone() };
        self.previous = Some(retiring);
        self.current = new_secret;
    }
}

/// An HMAC-family or future signing algorithm.
pub trait Algorithm: Send + Sync {
    fn name(&self) -> &'static str;
    fn sign(&self, key: &[u8], content: &str) -> Vec<u8>;
}

pub struct HmacSha256;

impl Algorithm for HmacSha256 {
    fn name(&self) -> &'static str {
        "hmac-sha256"
    }

    fn sign(&self, key: &[u8], content: &str) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(content.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// A registry of signing algorithms, resolvable by name so a deployment
/// can add its own without touching this crate.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    entries: std::collections::HashMap<&'static str, Arc<dyn Algorithm>>,
}

impl AlgorithmRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { entries: std::collections::HashMap::new() };
        registry.register(Arc::new(HmacSha256));
        registry
    }

    pub fn register(&mut self, algorithm: Arc<dyn Algorithm>) {
        self.entries.insert(algorithm.name(), algorithm);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Algorithm>> {
        self.entries.get(name).cloned()
    }
}

/// A binary-to-text encoder for a computed signature.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, bytes: &[u8]) -> String;
}

pub struct Base64Encoder;

impl Encoder for Base64Encoder {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }
}

pub struct HexEncoder;

impl Encoder for HexEncoder {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn encode(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Clone)]
pub struct EncoderRegistry {
    entries: std::collections::HashMap<&'static str, Arc<dyn Encoder>>,
}

impl EncoderRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { entries: std::collections::HashMap::new() };
        registry.register(Arc::new(Base64Encoder));
        registry.register(Arc::new(HexEncoder));
        registry
    }

    pub fn register(&mut self, encoder: Arc<dyn Encoder>) {
        self.entries.insert(encoder.name(), encoder);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Encoder>> {
        self.entries.get(name).cloned()
    }
}

/// How the per-secret signatures are joined into one header value.
#[derive(Clone)]
pub enum HeaderFormat {
    /// `v1,<b64-0> v1,<b64-1>` — space-separated, `v1,` prefixed.
    StandardWebhooks,
    /// Per-signature template (e.g. `"{Algorithm}={Signature}"`) joined
    /// with `separator`.
    Classic { signature_template: String, separator: String },
}

impl HeaderFormat {
    fn render(&self, algorithm_name: &str, signatures: &[String]) -> String {
        match self {
            HeaderFormat::StandardWebhooks => signatures
                .iter()
                .map(|s| format!("v1,{s}"))
                .collect::<Vec<_>>()
                .join(" "),
            HeaderFormat::Classic { signature_template, separator } => signatures
                .iter()
                .map(|s| {
                    signature_template
                        .replace("{Algorithm}", algorithm_name)
                        .replace("{Signature}", s)
                })
                .collect::<Vec<_>>()
                .join(separator),
        }
    }
}

/// Produces one signature header value per publish.
pub struct SignatureManager {
    content_template: String,
    header_format: HeaderFormat,
    algorithm: Arc<dyn Algorithm>,
    encoder: Arc<dyn Encoder>,
}

impl SignatureManager {
    pub fn new(
        content_template: impl Into<String>,
        header_format: HeaderFormat,
        algorithm: Arc<dyn Algorithm>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        Self { content_template: content_template.into(), header_format, algorithm, encoder }
    }

    /// Preset matching the Standard Webhooks specification:
    /// `{EventID}.{Timestamp.Unix}.{Body}` signed content, HMAC-SHA256,
    /// base64-encoded, `v1,<sig>` space-separated header.
    pub fn standard_webhooks() -> Self {
        Self::new(
            "{EventID}.{Timestamp.Unix}.{Body}",
            HeaderFormat::StandardWebhooks,
            Arc::new(HmacSha256),
            Arc::new(Base64Encoder),
        )
    }

    /// Classic Outpost-style template-driven header.
    pub fn classic(
        content_template: impl Into<String>,
        signature_template: impl Into<String>,
        separator: impl Into<String>,
        algorithm: Arc<dyn Algorithm>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        Self::new(
            content_template,
            HeaderFormat::Classic {
                signature_template: signature_template.into(),
                separator: separator.into(),
            },
            algorithm,
            encoder,
        )
    }

    fn render_content(&self, event_id: &str, topic: &str, timestamp: DateTime<Utc>, body: &str) -> String {
        self.content_template
            .replace("{EventID}", event_id)
            .replace("{Timestamp.Unix}", &timestamp.timestamp().to_string())
            .replace("{Timestamp}", &timestamp.to_rfc3339())
            .replace("{Topic}", topic)
            .replace("{Body}", body)
    }

    /// Sign `body` against every secret active at `now`. Returns an
    /// empty string (caller omits the header) if no secret is active.
    pub fn sign(
        &self,
        secrets: &SecretSet,
        now: DateTime<Utc>,
        event_id: &str,
        topic: &str,
        timestamp: DateTime<Utc>,
        body: &str,
    ) -> String {
        let active = secrets.active(now);
        if active.is_empty() {
            return String::new();
        }
        let content = self.render_content(event_id, topic, timestamp, body);
        let rendered: Vec<String> = active
            .iter()
            .map(|secret| self.encoder.encode(&self.algorithm.sign(&secret.key, &content)))
            .collect();
        self.header_format.render(self.algorithm.name(), &rendered)
    }
}

/// Verify `header` contains at least one signature matching `body`
/// signed by one of `secrets`' active entries. Used by inbound receiver
/// adapters and by tests that need round-trip confidence.
pub fn verify(
    manager: &SignatureManager,
    secrets: &SecretSet,
    now: DateTime<Utc>,
    event_id: &str,
    topic: &str,
    timestamp: DateTime<Utc>,
    body: &str,
    header: &str,
) -> bool {
    let expected = manager.sign(secrets, now, event_id, topic, timestamp, body);
    if expected.is_empty() || header.is_empty() {
        return false;
    }
    match &manager.header_format {
        HeaderFormat::StandardWebhooks => {
            let expected_tokens: std::collections::HashSet<&str> = expected.split(' ').collect();
            header.split(' ').any(|token| expected_tokens.contains(token))
        }
        HeaderFormat::Classic { separator, .. } => {
            let expected_tokens: std::collections::HashSet<&str> = expected.split(separator.as_str()).collect();
            header.split(separator.as_str()).any(|token| expected_tokens.contains(token))
        }
    }
}
