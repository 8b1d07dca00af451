//! Fuzz harness for configuration files (sinkproof.yaml / sinkproof.json)
//!
//! Parsing may fail; it must not panic, and anything that parses must
//! render back out.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sinkproof_config::{ConfigFormat, parse_config, render_config};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    for format in [ConfigFormat::Yaml, ConfigFormat::Json] {
        if let Ok(config) = parse_config(input, format) {
            let _ = config.validate();
            assert!(render_config(&config, format).is_ok());
        }
    }
});
