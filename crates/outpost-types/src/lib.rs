//! Core domain types shared across the outpost workspace.
//!
//! This crate holds the persisted entities (`Tenant`, `Destination`,
//! `DestinationSummary`), the in-flight message shapes that cross
//! ingestion/delivery/retry (`Event`, `DeliveryTask`, `Delivery`), the
//! opaque keyset-pagination `Cursor`, and the error taxonomy every other
//! crate in the workspace surfaces uniformly (`OutpostError`).
//!
//! # Example
//!
//! ```
//! use outpost_types::{Destination, TopicSet};
//!
//! let topics = TopicSet::new(vec!["user.created".to_string()]).expect("topics");
//! assert!(topics.matches_event_topic("user.created"));
//! assert!(!topics.matches_event_topic("user.deleted"));
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

mod cursor;
pub use cursor::{Cursor, CURSOR_VERSION};

/// The topics a destination is subscribed to: either every topic (`*`) or
/// an explicit, non-empty set. The two cannot be mixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSet {
    /// Matches every topic.
    Wildcard,
    /// Matches only the listed topics.
    Explicit(Vec<String>),
}

impl TopicSet {
    /// Build a topic set from a raw list, enforcing the non-empty and
    /// wildcard-exclusivity invariants from the destination model.
    pub fn new(topics: Vec<String>) -> Result<Self> {
        if topics.is_empty() {
            return Err(OutpostError::Validation(vec![ValidationError::new(
                "topics",
                ValidationErrorKind::Required,
            )]));
        }
        if topics.len() == 1 && topics[0] == "*" {
            return Ok(TopicSet::Wildcard);
        }
        if topics.iter().any(|t| t == "*") {
            return Err(OutpostError::Validation(vec![ValidationError::new(
                "topics",
                ValidationErrorKind::Forbidden,
            )]));
        }
        Ok(TopicSet::Explicit(topics))
    }

    /// Whether this destination's topic set matches an event's topic.
    ///
    /// An empty or `*` event topic matches everything. Otherwise the
    /// destination must either be a wildcard subscriber or explicitly
    /// list the event's topic.
    pub fn matches_event_topic(&self, event_topic: &str) -> bool {
        if event_topic.is_empty() || event_topic == "*" {
            return true;
        }
        match self {
            TopicSet::Wildcard => true,
            TopicSet::Explicit(topics) => topics.iter().any(|t| t == event_topic),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TopicSet::Wildcard)
    }

    /// Union this topic set into an accumulator, collapsing to wildcard
    /// if either side is a wildcard.
    pub fn union_into(&self, acc: &mut TopicUnion) {
        match self {
            TopicSet::Wildcard => acc.wildcard = true,
            TopicSet::Explicit(topics) => acc.topics.extend(topics.iter().cloned()),
        }
    }
}

/// Accumulator for the union topic set derived for a tenant summary.
#[derive(Debug, Clone, Default)]
pub struct TopicUnion {
    pub wildcard: bool,
    pub topics: std::collections::BTreeSet<String>,
}

impl Serialize for TopicSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            TopicSet::Wildcard => serializer.serialize_str("*"),
            TopicSet::Explicit(topics) => topics.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TopicSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) if s == "*" => Ok(TopicSet::Wildcard),
            serde_json::Value::Array(_) => {
                let topics: Vec<String> =
                    serde_json::from_value(value).map_err(de::Error::custom)?;
                TopicSet::new(topics).map_err(de::Error::custom)
            }
            other => Err(de::Error::custom(format!(
                "invalid topic set: {other}"
            ))),
        }
    }
}

/// Identity scope. Created on demand, soft-deleted with a grace window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Clear the tombstone, reviving the tenant. Caller is responsible for
    /// refreshing `updated_at`.
    pub fn revive(&mut self) {
        self.deleted_at = None;
    }
}

/// A delivery endpoint belonging to exactly one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub tenant_id: String,
    /// Provider type tag (e.g. `"webhook"`, `"rabbitmq"`, `"s3"`).
    #[serde(rename = "type")]
    pub destination_type: String,
    pub topics: TopicSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Decrypted view of provider credentials. At rest these are
    /// encrypted blobs; the store layer decrypts on read.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Decrypted view of delivery metadata, forwarded as transport
    /// headers at publish time.
    #[serde(default)]
    pub delivery_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Destination {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    pub fn summary(&self) -> DestinationSummary {
        DestinationSummary {
            id: self.id.clone(),
            destination_type: self.destination_type.clone(),
            topics: self.topics.clone(),
            filter: self.filter.clone(),
            disabled_at: self.disabled_at,
        }
    }
}

/// Small per-tenant-summary-map projection used by the matcher so it
/// never has to load a full destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub destination_type: String,
    pub topics: TopicSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
}

impl DestinationSummary {
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }
}

/// Immutable ingestion record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub tenant_id: String,
    /// Advisory only: a prior iteration honoured this for matching;
    /// current `MatchEvent` ignores it and matches purely on topic and
    /// filter. Exposed for higher layers that want to pre-narrow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    pub topic: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub data: serde_json::Value,
    #[serde(default = "default_true")]
    pub eligible_for_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Ephemeral message connecting ingestion, retry scheduling, idempotency,
/// and manual replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub event: Event,
    pub destination_id: String,
    /// 0-based attempt count.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub manual: bool,
    /// Present only for manual retries, so repeated manual replays don't
    /// deduplicate against each other.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<serde_json::Value>,
}

/// Delivery attempt outcome, as written to the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub tenant_id: String,
    pub event_id: String,
    pub destination_id: String,
    pub attempt: u32,
    pub manual: bool,
    pub status: DeliveryStatus,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

/// A destination's signing secret, with an optional still-valid previous
/// secret carried through a rotation window (see `outpost-signature`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSecret {
    /// `whsec_<base64>`.
    pub secret: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_secret_invalid_at: Option<DateTime<Utc>>,
}

impl WebhookSecret {
    /// Whether `previous_secret` is still inside its rotation window at
    /// the given instant.
    pub fn previous_still_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.previous_secret, self.previous_secret_invalid_at) {
            (Some(_), Some(invalid_at)) => now < invalid_at,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Sort order for `ListTenant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    #[default]
    Desc,
    Asc,
}

impl ListOrder {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(ListOrder::Asc),
            "desc" => Ok(ListOrder::Desc),
            other => Err(OutpostError::InvalidOrder(other.to_string())),
        }
    }
}

/// Field-path failure kinds for structured validation errors, per the
/// external error response shape `{field, type}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Required,
    Pattern,
    Invalid,
    Forbidden,
    InvalidType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

/// Error taxonomy surfaced uniformly across the store, provider, and
/// publisher layers.
#[derive(Debug, thiserror::Error)]
pub enum OutpostError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),
    #[error("destination not found: {0}")]
    DestinationNotFound(String),
    #[error("tenant deleted: {0}")]
    TenantDeleted(String),
    #[error("destination deleted: {0}")]
    DestinationDeleted(String),
    #[error("destination already exists: {0}")]
    DuplicateDestination(String),
    #[error("tenant {tenant_id} has reached the maximum of {max} destinations")]
    MaxDestinationsPerTenantReached { tenant_id: String, max: u32 },
    #[error("validation failed: {0:?}")]
    Validation(Vec<ValidationError>),
    #[error("invalid cursor")]
    InvalidCursor,
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("cannot supply both next and prev cursors")]
    ConflictingCursors,
    #[error("tenant listing is not supported by this key-value backend")]
    ListTenantNotSupported,
    #[error("publisher is closed")]
    PublisherClosed,
    #[error("encryption failure: {0}")]
    Encryption(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, OutpostError>;
