#![no_main]

use libfuzzer_sys::fuzz_target;
use outpost_types::Cursor;

fuzz_target!(|data: (i64, String)| {
    let (millis, garbage) = data;

    // Any cursor we mint must decode back to the same position.
    let cursor = Cursor::new(millis);
    let token = cursor.encode();
    let back = Cursor::decode(&token).expect("a cursor we just encoded must decode");
    assert_eq!(back, cursor);

    // Arbitrary strings fed to decode must never panic, only ever `Err`.
    let _ = Cursor::decode(&garbage);
});
