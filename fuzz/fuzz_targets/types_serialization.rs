#![no_main]

use libfuzzer_sys::fuzz_target;
use outpost_types::{Delivery, Destination, Tenant};

fuzz_target!(|data: &[u8]| {
    let Ok(json_str) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(tenant) = serde_json::from_str::<Tenant>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&tenant) {
            let parsed: Tenant = serde_json::from_str(&roundtripped).expect("roundtrip must re-parse");
            assert_eq!(tenant.id, parsed.id);
            assert_eq!(tenant.deleted_at, parsed.deleted_at);
        }
    }

    if let Ok(destination) = serde_json::from_str::<Destination>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&destination) {
            let parsed: Destination = serde_json::from_str(&roundtripped).expect("roundtrip must re-parse");
            assert_eq!(destination.id, parsed.id);
            assert_eq!(destination.tenant_id, parsed.tenant_id);
        }
    }

    if let Ok(delivery) = serde_json::from_str::<Delivery>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&delivery) {
            let parsed: Delivery = serde_json::from_str(&roundtripped).expect("roundtrip must re-parse");
            assert_eq!(delivery.id, parsed.id);
            assert_eq!(delivery.status, parsed.status);
        }
    }
});
