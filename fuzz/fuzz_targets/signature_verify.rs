#![no_main]

use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use outpost_signature::{verify, Secret, SecretSet, SignatureManager};

fuzz_target!(|data: (i64, String, String, String)| {
    let (secs, event_id, topic, body) = data;
    let now = DateTime::from_timestamp(secs, 0).unwrap_or_default();

    let manager = SignatureManager::standard_webhooks();
    let secret = Secret::generate(now);
    let set = SecretSet::new(secret);

    let header = manager.sign(&set, now, &event_id, &topic, now, &body);

    // A header we just produced must verify against the body it was
    // signed over, and never panic regardless of what garbage the
    // event id/topic/body fuzz inputs contain.
    assert!(verify(&manager, &set, now, &event_id, &topic, now, &body, &header));

    // Feeding the header back against a different body must never panic
    // and must not verify (barring an accidental body/tampered-body
    // collision, which `!=` below rules out).
    let tampered = format!("{body}x");
    if tampered != body {
        assert!(!verify(&manager, &set, now, &event_id, &topic, now, &tampered, &header));
    }
});
