//! Fuzz harness for captured event records (the `receive` JSON lines)

#![no_main]

use libfuzzer_sys::fuzz_target;
use sinkproof_schema::event::CapturedEvent;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = serde_json::from_slice::<CapturedEvent>(data) {
        let json = serde_json::to_string(&event).expect("captured events serialize");
        let back: CapturedEvent = serde_json::from_str(&json).expect("serialized events parse");
        assert_eq!(back, event);
    }
});
