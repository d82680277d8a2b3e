//! Keyset pagination over the tenant-by-creation-time index.
//!
//! Cursors never carry anything but a timestamp (see
//! [`outpost_types::Cursor`]), so the secondary-index sort key packs in
//! the tenant id too, purely to break ties between tenants created in
//! the same millisecond — the wire cursor itself stays a plain
//! timestamp.

use chrono::{DateTime, Utc};
use outpost_kv::{SearchOrder, SearchableKv};
use outpost_types::{Cursor, ListOrder, OutpostError, Result, Tenant};

use crate::{from_millis, keys, parse_field, to_transport};

pub const TENANT_INDEX: &str = "tenant_by_created_at";

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

/// Zero-padded so lexicographic and chronological order agree. Assumes
/// `millis` is non-negative, true for any `created_at` derived from
/// `Utc::now()`.
fn pad_millis(millis: i64) -> String {
    format!("{millis:020}")
}

/// Sort key for the tenant-by-creation-time index: zero-padded millis,
/// then the id, so two tenants created in the same millisecond still
/// sort deterministically instead of colliding.
pub fn sort_key(created_at: DateTime<Utc>, id: &str) -> String {
    format!("{}:{id}", pad_millis(created_at.timestamp_millis()))
}

/// Exclusive upper bound matching "strictly before this timestamp":
/// any sort key sharing `millis` sorts after this bound (it's a
/// proper prefix of theirs), so same-millisecond rows are excluded too.
fn boundary_before(millis: i64) -> String {
    pad_millis(millis)
}

/// Exclusive lower bound matching "strictly after this timestamp". `~`
/// sorts after `:` and every digit, so same-millisecond rows (which
/// continue `millis:id`) fall below this bound and are excluded.
fn boundary_after(millis: i64) -> String {
    format!("{}~", pad_millis(millis))
}

#[derive(Debug, Clone)]
pub struct ListTenantRequest {
    /// Clamped to `[1, 100]`; `<= 0` falls back to the default of 20.
    pub limit: i64,
    pub next: Option<String>,
    pub prev: Option<String>,
    pub order: ListOrder,
}

impl Default for ListTenantRequest {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, next: None, prev: None, order: ListOrder::default() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListTenantResponse {
    pub tenants: Vec<Tenant>,
    #[doc = "Opaque token for the next page, `None` once exhausted."]
    pub next: Option<String>,
    #[doc = "Opaque token for the previous page, `None` on the first page."]
    pub prev: Option<String>,
    pub total: u64,
}

fn decode_tenant(id: &str, row: &std::collections::BTreeMap<String, Vec<u8>>) -> Result<Tenant> {
    let created_at = from_millis(parse_field::<i64>(row, keys::F_CREATED_AT)?.unwrap_or(0))?;
    let updated_at = match parse_field::<i64>(row, keys::F_UPDATED_AT)? {
        Some(millis) => from_millis(millis)?,
        None => created_at,
    };
    let metadata = parse_field::<std::collections::BTreeMap<String, String>>(row, keys::F_METADATA)?.unwrap_or_default();
    Ok(Tenant { id: id.to_string(), created_at, updated_at, metadata, deleted_at: None })
}

pub async fn list(search: &dyn SearchableKv, request: ListTenantRequest) -> Result<ListTenantResponse> {
    if request.next.is_some() && request.prev.is_some() {
        return Err(OutpostError::ConflictingCursors);
    }

    let limit: usize = if request.limit <= 0 { DEFAULT_LIMIT } else { request.limit.min(MAX_LIMIT) } as usize;

    let total = search
        .index_prefix(TENANT_INDEX, "", usize::MAX)
        .await
        .map_err(to_transport)?
        .len() as u64;

    // `is_subsequent_page` distinguishes the very first call (no cursor
    // supplied either way) from every later one, since only the first
    // page omits `prev` in its response.
    let (ids, is_subsequent_page) = if let Some(token) = &request.next {
        let cursor = Cursor::decode(token)?;
        let (after, before, query_order) = match request.order {
            ListOrder::Desc => (None, Some(boundary_before(cursor.millis)), SearchOrder::Desc),
            ListOrder::Asc => (Some(boundary_after(cursor.millis)), None, SearchOrder::Asc),
        };
        let ids = search
            .index_range(TENANT_INDEX, after.as_deref(), before.as_deref(), limit, query_order)
            .await
            .map_err(to_transport)?;
        (ids, true)
    } else if let Some(token) = &request.prev {
        let cursor = Cursor::decode(token)?;
        // Reversed range and reversed sort direction; reverse the slice
        // back before returning so the caller always sees results in
        // their requested order.
        let (after, before, query_order) = match request.order {
            ListOrder::Desc => (Some(boundary_after(cursor.millis)), None, SearchOrder::Asc),
            ListOrder::Asc => (None, Some(boundary_before(cursor.millis)), SearchOrder::Desc),
        };
        let mut ids = search
            .index_range(TENANT_INDEX, after.as_deref(), before.as_deref(), limit, query_order)
            .await
            .map_err(to_transport)?;
        ids.reverse();
        (ids, true)
    } else {
        let query_order = match request.order {
            ListOrder::Desc => SearchOrder::Desc,
            ListOrder::Asc => SearchOrder::Asc,
        };
        let ids = search
            .index_range(TENANT_INDEX, None, None, limit, query_order)
            .await
            .map_err(to_transport)?;
        (ids, false)
    };

    let mut tenants = Vec::with_capacity(ids.len());
    for id in &ids {
        let row = search.hgetall(&keys::tenant_key(id)).await.map_err(to_transport)?;
        tenants.push(decode_tenant(id, &row)?);
    }

    let next = tenants.last().map(|t| Cursor::new(t.created_at.timestamp_millis()).encode());
    let prev = if is_subsequent_page {
        tenants.first().map(|t| Cursor::new(t.created_at.timestamp_millis()).encode())
    } else {
        None
    };

    Ok(ListTenantResponse { tenants, next, prev, total })
}
