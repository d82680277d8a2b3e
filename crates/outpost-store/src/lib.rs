//! Tenant/destination registry and event-matching engine.
//!
//! Everything here is built over `outpost_kv::KvStore` (plus the optional
//! `SearchableKv` supertrait for cursor-paginated tenant listing) and
//! `outpost_cipher::Cipher` for credentials/delivery-metadata at rest.
//! All keys for one tenant share a hash-tag group (`tenant:{T}:...`) so a
//! sharded backend can commit a tenant's writes atomically in one
//! transaction; see [`keys`].

mod keys;
mod pagination;

pub use pagination::{ListTenantRequest, ListTenantResponse};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outpost_cipher::Cipher;
use outpost_kv::{KvOp, KvStore};
use outpost_types::{
    Destination, DestinationSummary, Event, OutpostError, Result, Tenant, TopicSet, TopicUnion,
};

/// Tombstoned tenants and destinations keep their key around for this
/// long, so re-creating the same id within the window revives it
/// instead of starting from a blank slate.
pub const TOMBSTONE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Default cap on destinations per tenant; overridable per store.
pub const DEFAULT_MAX_DESTINATIONS_PER_TENANT: u32 = 20;

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(OutpostError::Serialization(format!(
        "invalid timestamp: {millis}ms"
    )))
}

fn parse_field<T: serde::de::DeserializeOwned>(
    row: &BTreeMap<String, Vec<u8>>,
    field: &str,
) -> Result<Option<T>> {
    match row.get(field) {
        Some(bytes) => {
            let value = serde_json::from_slice(bytes)
                .map_err(|e| OutpostError::Serialization(format!("{field}: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn to_json_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| OutpostError::Serialization(e.to_string()))
}

/// Tenant/destination registry and event matcher.
///
/// Cheap to clone: both `kv` and `cipher` are held behind `Arc`.
pub struct Store {
    kv: Arc<dyn KvStore>,
    cipher: Arc<dyn Cipher>,
    max_destinations_per_tenant: u32,
    /// When a destination subscribes to `*`, `RetrieveTenant`'s derived
    /// topic union collapses to this configured list instead of a bare
    /// `"*"` marker, if one is configured.
    available_topics: Option<Vec<String>>,
    search_supported: bool,
}

/// Tenant plus the derived fields `RetrieveTenant` computes from the
/// destination summary index.
#[derive(Debug, Clone)]
pub struct TenantDetail {
    pub tenant: Tenant,
    pub destinations_count: u32,
    pub topics: Vec<String>,
}

impl Store {
    /// Build a store over `kv`/`cipher`. Call [`Store::init`] once before
    /// using [`Store::list_tenants`] so the optional search capability is
    /// probed exactly once.
    pub fn new(kv: Arc<dyn KvStore>, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            kv,
            cipher,
            max_destinations_per_tenant: DEFAULT_MAX_DESTINATIONS_PER_TENANT,
            available_topics: None,
            search_supported: false,
        }
    }

    pub fn with_max_destinations_per_tenant(mut self, max: u32) -> Self {
        self.max_destinations_per_tenant = max;
        self
    }

    pub fn with_available_topics(mut self, topics: Vec<String>) -> Self {
        self.available_topics = Some(topics);
        self
    }

    /// Probe whether the backing `KvStore` also implements `SearchableKv`.
    /// Idempotent; cheap enough to call more than once.
    pub async fn init(&mut self) {
        self.search_supported = self.kv.searchable().is_some();
    }

    fn searchable(&self) -> Result<&dyn outpost_kv::SearchableKv> {
        if !self.search_supported {
            return Err(OutpostError::ListTenantNotSupported);
        }
        self.kv.searchable().ok_or(OutpostError::ListTenantNotSupported)
    }

    // ---------------------------------------------------------------
    // Tenant CRUD
    // ---------------------------------------------------------------

    /// Idempotent. Clears any tombstone and revives the tenant's prior
    /// `created_at` if one existed; otherwise this is a fresh tenant.
    pub async fn upsert_tenant(&self, id: &str, metadata: BTreeMap<String, String>) -> Result<Tenant> {
        let key = keys::tenant_key(id);
        let existing = self.kv.hgetall(&key).await.map_err(to_transport)?;
        let now = Utc::now();
        let created_at = match parse_field::<i64>(&existing, keys::F_CREATED_AT)? {
            Some(millis) => from_millis(millis)?,
            None => now,
        };
        let was_deleted = existing.contains_key(keys::F_DELETED_AT);

        let tenant = Tenant {
            id: id.to_string(),
            created_at,
            updated_at: now,
            metadata,
            deleted_at: None,
        };

        let mut fields = BTreeMap::new();
        fields.insert(keys::F_ID.to_string(), id.as_bytes().to_vec());
        fields.insert(keys::F_CREATED_AT.to_string(), to_millis(created_at).to_string().into_bytes());
        fields.insert(keys::F_UPDATED_AT.to_string(), to_millis(now).to_string().into_bytes());
        fields.insert(keys::F_METADATA.to_string(), to_json_bytes(&tenant.metadata)?);

        self.kv.hset_many(&key, fields).await.map_err(to_transport)?;
        self.kv.hdel(&key, keys::F_DELETED_AT).await.map_err(to_transport)?;
        self.kv.persist(&key).await.map_err(to_transport)?;

        if was_deleted {
            tracing::info!(tenant_id = %id, "revived tombstoned tenant");
        }

        self.index_put_tenant(&tenant).await?;
        Ok(tenant)
    }

    /// Atomically tombstones the tenant and every destination in its
    /// summary, drops the summary index, and sets a 7-day TTL on every
    /// key so a re-created id revives cleanly within the window.
    pub async fn delete_tenant(&self, id: &str) -> Result<()> {
        let tenant_key = keys::tenant_key(id);
        let tenant_row = self.kv.hgetall(&tenant_key).await.map_err(to_transport)?;
        if tenant_row.is_empty() || tenant_row.contains_key(keys::F_DELETED_AT) {
            return Err(OutpostError::TenantNotFound(id.to_string()));
        }

        let destinations_key = keys::destinations_key(id);
        let summary_row = self.kv.hgetall(&destinations_key).await.map_err(to_transport)?;
        let destination_ids: Vec<String> = summary_row.keys().cloned().collect();

        let now_ms = to_millis(Utc::now()).to_string().into_bytes();
        let hash_tag = keys::tenant_hash_tag(id);
        let mut ops = vec![KvOp::HSet {
            key: tenant_key.clone(),
            field: keys::F_DELETED_AT.to_string(),
            value: now_ms.clone(),
        }];
        for destination_id in &destination_ids {
            ops.push(KvOp::HSet {
                key: keys::destination_key(id, destination_id),
                field: keys::F_DELETED_AT.to_string(),
                value: now_ms.clone(),
            });
        }
        ops.push(KvOp::Del { key: destinations_key });
        self.kv.atomic(&hash_tag, ops).await.map_err(to_transport)?;

        self.kv.expire(&tenant_key, TOMBSTONE_TTL).await.map_err(to_transport)?;
        for destination_id in &destination_ids {
            self.kv
                .expire(&keys::destination_key(id, destination_id), TOMBSTONE_TTL)
                .await
                .map_err(to_transport)?;
        }

        self.index_del_tenant(id).await?;
        tracing::info!(tenant_id = %id, destinations_tombstoned = destination_ids.len(), "deleted tenant");
        Ok(())
    }

    /// Pipelines the tenant hash and its destination summary to derive
    /// `destinations_count` and the union topic set.
    pub async fn retrieve_tenant(&self, id: &str) -> Result<TenantDetail> {
        let tenant_key = keys::tenant_key(id);
        let destinations_key = keys::destinations_key(id);

        let tenant_row = self.kv.hgetall(&tenant_key).await.map_err(to_transport)?;
        if tenant_row.is_empty() {
            return Err(OutpostError::TenantNotFound(id.to_string()));
        }
        if tenant_row.contains_key(keys::F_DELETED_AT) {
            return Err(OutpostError::TenantDeleted(id.to_string()));
        }

        let created_at = from_millis(parse_field::<i64>(&tenant_row, keys::F_CREATED_AT)?.unwrap_or(0))?;
        let updated_at = match parse_field::<i64>(&tenant_row, keys::F_UPDATED_AT)? {
            Some(millis) => from_millis(millis)?,
            // Legacy records without `updated_at` default to `created_at`.
            None => created_at,
        };
        let metadata = parse_field::<BTreeMap<String, String>>(&tenant_row, keys::F_METADATA)?.unwrap_or_default();

        let tenant = Tenant { id: id.to_string(), created_at, updated_at, metadata, deleted_at: None };

        let summary_row = self.kv.hgetall(&destinations_key).await.map_err(to_transport)?;
        let mut union = TopicUnion::default();
        for bytes in summary_row.values() {
            let summary: DestinationSummary = serde_json::from_slice(bytes)
                .map_err(|e| OutpostError::Serialization(e.to_string()))?;
            summary.topics.union_into(&mut union);
        }
        let topics = if union.wildcard {
            self.available_topics.clone().unwrap_or_else(|| vec!["*".to_string()])
        } else {
            union.topics.into_iter().collect()
        };

        Ok(TenantDetail { tenant, destinations_count: summary_row.len() as u32, topics })
    }

    async fn index_put_tenant(&self, tenant: &Tenant) -> Result<()> {
        if self.kv.searchable().is_none() {
            return Ok(());
        }
        let sort_key = pagination::sort_key(tenant.created_at, &tenant.id);
        self.kv
            .searchable()
            .expect("checked above")
            .index_put(pagination::TENANT_INDEX, &sort_key, tenant.id.clone())
            .await
            .map_err(to_transport)
    }

    async fn index_del_tenant(&self, id: &str) -> Result<()> {
        if self.kv.searchable().is_none() {
            return Ok(());
        }
        // The index is keyed by `created_at`, which `delete_tenant` doesn't
        // have handy; re-read it rather than thread it through every caller.
        let tenant_row = self.kv.hgetall(&keys::tenant_key(id)).await.map_err(to_transport)?;
        let Some(created_at) = parse_field::<i64>(&tenant_row, keys::F_CREATED_AT)? else {
            return Ok(());
        };
        let created_at = from_millis(created_at)?;
        let sort_key = pagination::sort_key(created_at, id);
        self.kv
            .searchable()
            .expect("checked above")
            .index_del(pagination::TENANT_INDEX, &sort_key)
            .await
            .map_err(to_transport)
    }

    /// Keyset-paginated tenant listing. Only available once `init` has
    /// confirmed the backing store supports search.
    pub async fn list_tenants(&self, request: ListTenantRequest) -> Result<ListTenantResponse> {
        let search = self.searchable()?;
        pagination::list(search, request).await
    }

    // ---------------------------------------------------------------
    // Destination CRUD
    // ---------------------------------------------------------------

    /// Fails `DuplicateDestination` if an active destination shares the
    /// id, and `MaxDestinationsPerTenantReached` at the per-tenant cap.
    pub async fn create_destination(&self, destination: Destination) -> Result<Destination> {
        let destinations_key = keys::destinations_key(&destination.tenant_id);
        let summary_row = self.kv.hgetall(&destinations_key).await.map_err(to_transport)?;

        if summary_row.contains_key(&destination.id) {
            let destination_row = self
                .kv
                .hgetall(&keys::destination_key(&destination.tenant_id, &destination.id))
                .await
                .map_err(to_transport)?;
            if !destination_row.contains_key(keys::F_DELETED_AT) {
                return Err(OutpostError::DuplicateDestination(destination.id.clone()));
            }
        } else if summary_row.len() as u32 >= self.max_destinations_per_tenant {
            return Err(OutpostError::MaxDestinationsPerTenantReached {
                tenant_id: destination.tenant_id.clone(),
                max: self.max_destinations_per_tenant,
            });
        }

        self.upsert_destination(destination).await
    }

    /// Encrypts credentials/delivery-metadata and marshals every field
    /// before opening the atomic transaction, so a serialization failure
    /// never leaves a partial write.
    pub async fn upsert_destination(&self, mut destination: Destination) -> Result<Destination> {
        let key = keys::destination_key(&destination.tenant_id, &destination.id);
        let existing = self.kv.hgetall(&key).await.map_err(to_transport)?;
        let created_at = match parse_field::<i64>(&existing, keys::F_CREATED_AT)? {
            Some(millis) => from_millis(millis)?,
            None => destination.created_at,
        };
        destination.created_at = created_at;
        destination.updated_at = Utc::now();

        let credentials_ct = self
            .cipher
            .encrypt(&to_json_bytes(&destination.credentials)?)
            .map_err(|e| OutpostError::Encryption(e.to_string()))?;
        let delivery_metadata_ct = self
            .cipher
            .encrypt(&to_json_bytes(&destination.delivery_metadata)?)
            .map_err(|e| OutpostError::Encryption(e.to_string()))?;

        let mut fields = BTreeMap::new();
        fields.insert(keys::F_ID.to_string(), destination.id.as_bytes().to_vec());
        fields.insert(keys::F_TENANT_ID.to_string(), destination.tenant_id.as_bytes().to_vec());
        fields.insert(keys::F_TYPE.to_string(), destination.destination_type.as_bytes().to_vec());
        fields.insert(keys::F_TOPICS.to_string(), to_json_bytes(&destination.topics)?);
        fields.insert(keys::F_CONFIG.to_string(), to_json_bytes(&destination.config)?);
        fields.insert(keys::F_CREDENTIALS.to_string(), credentials_ct);
        fields.insert(keys::F_DELIVERY_METADATA.to_string(), delivery_metadata_ct);
        fields.insert(keys::F_METADATA.to_string(), to_json_bytes(&destination.metadata)?);
        fields.insert(keys::F_CREATED_AT.to_string(), to_millis(destination.created_at).to_string().into_bytes());
        fields.insert(keys::F_UPDATED_AT.to_string(), to_millis(destination.updated_at).to_string().into_bytes());
        if let Some(filter) = &destination.filter {
            // Written only when non-empty.
            if !(filter.is_null() || filter.as_object().is_some_and(|m| m.is_empty())) {
                fields.insert(keys::F_FILTER.to_string(), to_json_bytes(filter)?);
            }
        }
        if let Some(disabled_at) = destination.disabled_at {
            fields.insert(keys::F_DISABLED_AT.to_string(), to_millis(disabled_at).to_string().into_bytes());
        }

        let summary = destination.summary();
        let summary_bytes = to_json_bytes(&summary)?;

        let hash_tag = keys::tenant_hash_tag(&destination.tenant_id);
        let mut ops: Vec<KvOp> = fields
            .into_iter()
            .map(|(field, value)| KvOp::HSet { key: key.clone(), field, value })
            .collect();
        ops.push(KvOp::HDel { key: key.clone(), field: keys::F_DELETED_AT.to_string() });
        if destination.filter.is_none() {
            ops.push(KvOp::HDel { key: key.clone(), field: keys::F_FILTER.to_string() });
        }
        if destination.disabled_at.is_none() {
            ops.push(KvOp::HDel { key: key.clone(), field: keys::F_DISABLED_AT.to_string() });
        }
        ops.push(KvOp::HSet {
            key: keys::destinations_key(&destination.tenant_id),
            field: destination.id.clone(),
            value: summary_bytes,
        });

        self.kv.atomic(&hash_tag, ops).await.map_err(to_transport)?;
        self.kv.persist(&key).await.map_err(to_transport)?;

        Ok(destination)
    }

    pub async fn retrieve_destination(&self, tenant_id: &str, destination_id: &str) -> Result<Destination> {
        let row = self
            .kv
            .hgetall(&keys::destination_key(tenant_id, destination_id))
            .await
            .map_err(to_transport)?;
        if row.is_empty() {
            return Err(OutpostError::DestinationNotFound(destination_id.to_string()));
        }
        if row.contains_key(keys::F_DELETED_AT) {
            return Err(OutpostError::DestinationDeleted(destination_id.to_string()));
        }
        self.decode_destination(&row)
    }

    fn decode_destination(&self, row: &BTreeMap<String, Vec<u8>>) -> Result<Destination> {
        let id = parse_field::<String>(row, keys::F_ID)?.unwrap_or_default();
        let tenant_id = parse_field::<String>(row, keys::F_TENANT_ID)?.unwrap_or_default();
        let destination_type = row
            .get(keys::F_TYPE)
            .map(|b| String::from_utf8_lossy(b).to_string())
            .unwrap_or_default();
        let topics = row
            .get(keys::F_TOPICS)
            .map(|b| serde_json::from_slice::<TopicSet>(b))
            .transpose()
            .map_err(|e| OutpostError::Serialization(e.to_string()))?
            .unwrap_or(TopicSet::Wildcard);
        let filter = parse_field::<serde_json::Value>(row, keys::F_FILTER)?;
        let config = parse_field::<BTreeMap<String, String>>(row, keys::F_CONFIG)?.unwrap_or_default();
        let metadata = parse_field::<BTreeMap<String, String>>(row, keys::F_METADATA)?.unwrap_or_default();

        let credentials = match row.get(keys::F_CREDENTIALS) {
            Some(ct) => {
                let plain = self.cipher.decrypt(ct).map_err(|e| OutpostError::Encryption(e.to_string()))?;
                serde_json::from_slice(&plain).map_err(|e| OutpostError::Serialization(e.to_string()))?
            }
            None => BTreeMap::new(),
        };
        let delivery_metadata = match row.get(keys::F_DELIVERY_METADATA) {
            Some(ct) => {
                let plain = self.cipher.decrypt(ct).map_err(|e| OutpostError::Encryption(e.to_string()))?;
                serde_json::from_slice(&plain).map_err(|e| OutpostError::Serialization(e.to_string()))?
            }
            None => BTreeMap::new(),
        };

        let created_at = from_millis(parse_field::<i64>(row, keys::F_CREATED_AT)?.unwrap_or(0))?;
        let updated_at = match parse_field::<i64>(row, keys::F_UPDATED_AT)? {
            Some(millis) => from_millis(millis)?,
            None => created_at,
        };
        let disabled_at = parse_field::<i64>(row, keys::F_DISABLED_AT)?.map(from_millis).transpose()?;

        Ok(Destination {
            id,
            tenant_id,
            destination_type,
            topics,
            filter,
            config,
            credentials,
            delivery_metadata,
            metadata,
            created_at,
            updated_at,
            disabled_at,
            deleted_at: None,
        })
    }

    /// Already-deleted is a no-op success; missing is `DestinationNotFound`.
    pub async fn delete_destination(&self, tenant_id: &str, destination_id: &str) -> Result<()> {
        let key = keys::destination_key(tenant_id, destination_id);
        let row = self.kv.hgetall(&key).await.map_err(to_transport)?;
        if row.is_empty() {
            return Err(OutpostError::DestinationNotFound(destination_id.to_string()));
        }
        if row.contains_key(keys::F_DELETED_AT) {
            return Ok(());
        }

        let hash_tag = keys::tenant_hash_tag(tenant_id);
        let now_ms = to_millis(Utc::now()).to_string().into_bytes();
        let ops = vec![
            KvOp::HDel { key: keys::destinations_key(tenant_id), field: destination_id.to_string() },
            KvOp::HSet { key: key.clone(), field: keys::F_DELETED_AT.to_string(), value: now_ms },
        ];
        self.kv.atomic(&hash_tag, ops).await.map_err(to_transport)?;
        self.kv.expire(&key, TOMBSTONE_TTL).await.map_err(to_transport)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Event matching
    // ---------------------------------------------------------------

    /// Matches purely on topic membership and the destination's content
    /// filter. `event.destination_id` is advisory only — see the crate's
    /// module docs; this deliberately does not pre-narrow on it.
    pub async fn match_event(&self, event: &Event) -> Result<Vec<DestinationSummary>> {
        let summary_row = self
            .kv
            .hgetall(&keys::destinations_key(&event.tenant_id))
            .await
            .map_err(to_transport)?;

        let mut matched = Vec::new();
        for bytes in summary_row.values() {
            let summary: DestinationSummary =
                serde_json::from_slice(bytes).map_err(|e| OutpostError::Serialization(e.to_string()))?;
            if summary.is_disabled() {
                continue;
            }
            if !summary.topics.matches_event_topic(&event.topic) {
                continue;
            }
            if let Some(filter) = &summary.filter {
                if !outpost_matcher::matches(&event.data, filter) {
                    continue;
                }
            }
            matched.push(summary);
        }
        Ok(matched)
    }
}

fn to_transport(err: anyhow::Error) -> OutpostError {
    OutpostError::Transport(err.to_string())
}

/// Collapses a destination summary map's topic sets into a single union,
/// exposed for callers (e.g. `retrieve_tenant`) that need it outside the
/// store's own pipeline.
pub fn union_topics(summaries: &[DestinationSummary]) -> BTreeSet<String> {
    let mut union = TopicUnion::default();
    for summary in summaries {
        summary.topics.union_into(&mut union);
    }
    union.topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_cipher::NoopCipher;
    use outpost_kv::InMemoryKv;
    use std::collections::BTreeMap;

    fn store() -> Store {
        Store::new(Arc::new(InMemoryKv::new()), Arc::new(NoopCipher))
    }

    fn destination(tenant_id: &str, id: &str, topics: TopicSet) -> Destination {
        let now = Utc::now();
        Destination {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            destination_type: "webhook".to_string(),
            topics,
            filter: None,
            config: BTreeMap::new(),
            credentials: BTreeMap::from([("secret".to_string(), "whsec_abc".to_string())]),
            delivery_metadata: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            disabled_at: None,
            deleted_at: None,
        }
    }

    fn event(tenant_id: &str, topic: &str, data: serde_json::Value) -> Event {
        Event {
            id: "evt_1".to_string(),
            tenant_id: tenant_id.to_string(),
            destination_id: None,
            topic: topic.to_string(),
            time: Utc::now(),
            metadata: BTreeMap::new(),
            data,
            eligible_for_retry: true,
            telemetry: None,
        }
    }

    #[tokio::test]
    async fn upsert_tenant_is_idempotent_and_clears_tombstone() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store.delete_tenant("t1").await.unwrap();
        assert!(matches!(
            store.retrieve_tenant("t1").await.unwrap_err(),
            OutpostError::TenantDeleted(_)
        ));

        let revived = store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        assert!(revived.deleted_at.is_none());
        let detail = store.retrieve_tenant("t1").await.unwrap();
        assert!(detail.tenant.deleted_at.is_none());
    }

    #[tokio::test]
    async fn delete_tenant_cascades_to_destinations() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store
            .create_destination(destination("t1", "d1", TopicSet::Wildcard))
            .await
            .unwrap();

        store.delete_tenant("t1").await.unwrap();

        assert!(matches!(
            store.retrieve_destination("t1", "d1").await.unwrap_err(),
            OutpostError::DestinationDeleted(_)
        ));
    }

    #[tokio::test]
    async fn delete_tenant_missing_fails() {
        let store = store();
        assert!(matches!(
            store.delete_tenant("nope").await.unwrap_err(),
            OutpostError::TenantNotFound(_)
        ));
    }

    #[tokio::test]
    async fn round_trip_persistence_preserves_fields() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        let created = store
            .create_destination(destination("t1", "d1", TopicSet::Wildcard))
            .await
            .unwrap();

        let fetched = store.retrieve_destination("t1", "d1").await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.credentials, created.credentials);
        assert!(fetched.updated_at >= fetched.created_at);
    }

    #[tokio::test]
    async fn create_destination_rejects_duplicate() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store
            .create_destination(destination("t1", "d1", TopicSet::Wildcard))
            .await
            .unwrap();
        assert!(matches!(
            store
                .create_destination(destination("t1", "d1", TopicSet::Wildcard))
                .await
                .unwrap_err(),
            OutpostError::DuplicateDestination(_)
        ));
    }

    #[tokio::test]
    async fn destination_cap_enforced_and_recoverable_after_delete() {
        let store = Store::new(Arc::new(InMemoryKv::new()), Arc::new(NoopCipher)).with_max_destinations_per_tenant(2);
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store.create_destination(destination("t1", "d1", TopicSet::Wildcard)).await.unwrap();
        store.create_destination(destination("t1", "d2", TopicSet::Wildcard)).await.unwrap();

        assert!(matches!(
            store
                .create_destination(destination("t1", "d3", TopicSet::Wildcard))
                .await
                .unwrap_err(),
            OutpostError::MaxDestinationsPerTenantReached { .. }
        ));

        store.delete_destination("t1", "d1").await.unwrap();
        store.create_destination(destination("t1", "d3", TopicSet::Wildcard)).await.unwrap();
    }

    #[tokio::test]
    async fn recreating_a_deleted_destination_preserves_its_original_created_at() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        let original = store.create_destination(destination("t1", "d1", TopicSet::Wildcard)).await.unwrap();

        store.delete_destination("t1", "d1").await.unwrap();
        let revived = store.create_destination(destination("t1", "d1", TopicSet::Wildcard)).await.unwrap();

        assert_eq!(revived.created_at, original.created_at);
        assert!(revived.deleted_at.is_none());
    }

    #[tokio::test]
    async fn delete_destination_is_idempotent_when_already_tombstoned() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store.create_destination(destination("t1", "d1", TopicSet::Wildcard)).await.unwrap();
        store.delete_destination("t1", "d1").await.unwrap();
        store.delete_destination("t1", "d1").await.unwrap();
    }

    #[tokio::test]
    async fn delete_destination_missing_fails() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        assert!(matches!(
            store.delete_destination("t1", "missing").await.unwrap_err(),
            OutpostError::DestinationNotFound(_)
        ));
    }

    #[tokio::test]
    async fn match_event_honours_topics_filter_and_disabled() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store.create_destination(destination("t1", "wild", TopicSet::Wildcard)).await.unwrap();
        store
            .create_destination(destination(
                "t1",
                "created",
                TopicSet::new(vec!["user.created".into()]).unwrap(),
            ))
            .await
            .unwrap();
        store
            .create_destination(destination(
                "t1",
                "deleted",
                TopicSet::new(vec!["user.deleted".into()]).unwrap(),
            ))
            .await
            .unwrap();

        let mut disabled = destination("t1", "disabled", TopicSet::Wildcard);
        disabled.disabled_at = Some(Utc::now());
        store.upsert_destination(disabled).await.unwrap();

        let mut filtered = destination("t1", "filtered", TopicSet::Wildcard);
        filtered.filter = Some(serde_json::json!({"data": {"type": "order.created"}}));
        store.upsert_destination(filtered).await.unwrap();

        let matched = store
            .match_event(&event("t1", "user.created", serde_json::json!({"type": "x"})))
            .await
            .unwrap();
        let ids: BTreeSet<_> = matched.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, BTreeSet::from(["wild".to_string(), "created".to_string()]));

        let matched_order = store
            .match_event(&event(
                "t1",
                "order.events",
                serde_json::json!({"type": "order.created", "amount": 1}),
            ))
            .await
            .unwrap();
        let ids: BTreeSet<_> = matched_order.iter().map(|s| s.id.clone()).collect();
        assert!(ids.contains("wild"));
        assert!(ids.contains("filtered"));
    }

    #[tokio::test]
    async fn retrieve_tenant_derives_count_and_topic_union() {
        let store = store();
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store
            .create_destination(destination("t1", "d1", TopicSet::new(vec!["a".into()]).unwrap()))
            .await
            .unwrap();
        store
            .create_destination(destination("t1", "d2", TopicSet::new(vec!["b".into()]).unwrap()))
            .await
            .unwrap();

        let detail = store.retrieve_tenant("t1").await.unwrap();
        assert_eq!(detail.destinations_count, 2);
        assert_eq!(detail.topics, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn retrieve_tenant_wildcard_collapses_to_available_topics() {
        let store = Store::new(Arc::new(InMemoryKv::new()), Arc::new(NoopCipher))
            .with_available_topics(vec!["a".into(), "b".into(), "c".into()]);
        store.upsert_tenant("t1", BTreeMap::new()).await.unwrap();
        store.create_destination(destination("t1", "d1", TopicSet::Wildcard)).await.unwrap();

        let detail = store.retrieve_tenant("t1").await.unwrap();
        assert_eq!(detail.topics, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn retrieve_missing_tenant_fails() {
        let store = store();
        assert!(matches!(
            store.retrieve_tenant("nope").await.unwrap_err(),
            OutpostError::TenantNotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_tenants_fails_without_search_support() {
        struct NoSearchKv(InMemoryKv);

        #[async_trait::async_trait]
        impl KvStore for NoSearchKv {
            async fn hget(&self, key: &str, field: &str) -> anyhow::Result<Option<Vec<u8>>> {
                self.0.hget(key, field).await
            }
            async fn hgetall(&self, key: &str) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
                self.0.hgetall(key).await
            }
            async fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> anyhow::Result<()> {
                self.0.hset(key, field, value).await
            }
            async fn hset_many(&self, key: &str, fields: BTreeMap<String, Vec<u8>>) -> anyhow::Result<()> {
                self.0.hset_many(key, fields).await
            }
            async fn hdel(&self, key: &str, field: &str) -> anyhow::Result<bool> {
                self.0.hdel(key, field).await
            }
            async fn hlen(&self, key: &str) -> anyhow::Result<u64> {
                self.0.hlen(key).await
            }
            async fn hkeys(&self, key: &str) -> anyhow::Result<Vec<String>> {
                self.0.hkeys(key).await
            }
            async fn exists(&self, key: &str) -> anyhow::Result<bool> {
                self.0.exists(key).await
            }
            async fn persist(&self, key: &str) -> anyhow::Result<bool> {
                self.0.persist(key).await
            }
            async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
                self.0.expire(key, ttl).await
            }
            async fn del(&self, key: &str) -> anyhow::Result<bool> {
                self.0.del(key).await
            }
            async fn pipeline(&self, ops: Vec<KvOp>) -> anyhow::Result<Vec<outpost_kv::KvOpResult>> {
                self.0.pipeline(ops).await
            }
            async fn atomic(&self, hash_tag: &str, ops: Vec<KvOp>) -> anyhow::Result<Vec<outpost_kv::KvOpResult>> {
                self.0.atomic(hash_tag, ops).await
            }
        }

        let mut store = Store::new(Arc::new(NoSearchKv(InMemoryKv::new())), Arc::new(NoopCipher));
        store.init().await;
        assert!(matches!(
            store.list_tenants(ListTenantRequest::default()).await.unwrap_err(),
            OutpostError::ListTenantNotSupported
        ));
    }
}
