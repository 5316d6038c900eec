#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use strata_store::effective_delivery_id;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let payload = serde_json::from_str::<Value>(&raw).unwrap_or(Value::Null);

    let supplied = effective_delivery_id(Some(&raw), &payload);
    if raw.trim().is_empty() {
        assert!(supplied.starts_with("delivery-"));
    } else {
        assert_eq!(supplied, raw);
    }

    let synthesized = effective_delivery_id(None, &payload);
    assert!(synthesized.starts_with("delivery-"));
    assert!(!synthesized.trim().is_empty());
});
