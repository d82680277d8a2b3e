#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (String, String)| {
    let (input_json, schema_json) = data;

    // Any well-formed JSON fed to the matcher must never panic: internal
    // errors and type mismatches resolve to `false`, never an abort.
    let Ok(input_value) = serde_json::from_str::<serde_json::Value>(&input_json) else {
        return;
    };
    let Ok(schema_value) = serde_json::from_str::<serde_json::Value>(&schema_json) else {
        return;
    };

    let _ = outpost_matcher::matches(&input_value, &schema_value);
});
