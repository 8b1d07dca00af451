//! Fuzz harness for bearer token verification
//!
//! Arbitrary strings presented as tokens must always come back as a typed
//! failure, never as valid and never as a panic.

#![no_main]

use jsonwebtoken::jwk::JwkSet;
use libfuzzer_sys::fuzz_target;
use sinkproof_identity::{StaticKeySource, Verifier, VerifierConfig};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    let verifier = Verifier::new(
        VerifierConfig::default(),
        Arc::new(StaticKeySource::new(JwkSet { keys: Vec::new() })),
    );
    let outcome =
        futures::executor::block_on(verifier.verify_with_subject(token, "audience", None));
    assert!(!outcome.is_valid());
});
