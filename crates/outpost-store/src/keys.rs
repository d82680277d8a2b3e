//! Key-builder contract: every key touching one tenant's data carries
//! that tenant's id as its hash-tag group (`tenant:{T}:...`), so a
//! sharded backend routes them all to the same slot and `KvStore::atomic`
//! can commit across them in one transaction. Centralized here rather
//! than spread across call sites, per the hash-tag-group design note.

pub fn tenant_hash_tag(tenant_id: &str) -> String {
    tenant_id.to_string()
}

pub fn tenant_key(tenant_id: &str) -> String {
    format!("tenant:{{{tenant_id}}}:tenant")
}

pub fn destinations_key(tenant_id: &str) -> String {
    format!("tenant:{{{tenant_id}}}:destinations")
}

pub fn destination_key(tenant_id: &str, destination_id: &str) -> String {
    format!("tenant:{{{tenant_id}}}:destination:{destination_id}")
}

// Hash field names, shared between the tenant hash and the destination
// hash where they overlap (`created_at`, `updated_at`, `metadata`,
// `deleted_at`).
pub const F_ID: &str = "id";
pub const F_TENANT_ID: &str = "tenant_id";
pub const F_TYPE: &str = "type";
pub const F_TOPICS: &str = "topics";
pub const F_FILTER: &str = "filter";
pub const F_CONFIG: &str = "config";
pub const F_CREDENTIALS: &str = "credentials";
pub const F_DELIVERY_METADATA: &str = "delivery_metadata";
pub const F_METADATA: &str = "metadata";
pub const F_CREATED_AT: &str = "created_at";
pub const F_UPDATED_AT: &str = "updated_at";
pub const F_DISABLED_AT: &str = "disabled_at";
pub const F_DELETED_AT: &str = "deleted_at";

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_kv::hash_tag;

    #[test]
    fn keys_share_one_hash_tag_group_per_tenant() {
        let tenant = tenant_key("acme");
        let destinations = destinations_key("acme");
        let destination = destination_key("acme", "dest_1");

        assert_eq!(hash_tag(&tenant), tenant_hash_tag("acme"));
        assert_eq!(hash_tag(&destinations), tenant_hash_tag("acme"));
        assert_eq!(hash_tag(&destination), tenant_hash_tag("acme"));
    }

    #[test]
    fn destination_key_is_scoped_to_its_tenant_and_id() {
        assert_eq!(destination_key("t1", "d1"), "tenant:{t1}:destination:d1");
    }
}
