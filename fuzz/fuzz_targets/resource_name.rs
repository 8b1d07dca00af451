//! Fuzz harness for resource name validation

#![no_main]

use libfuzzer_sys::fuzz_target;
use sinkproof_ids::{MAX_NAME_LEN, ResourceName, is_dns1123_label, make_random_k8s_name};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(name) = ResourceName::parse(input) {
        assert!(name.as_str().len() <= MAX_NAME_LEN);
        assert!(is_dns1123_label(name.as_str()));
    }

    // Any prefix, however odd, yields a valid name.
    let generated = make_random_k8s_name(input);
    assert!(is_dns1123_label(generated.as_str()));
});
