//! Identity token verification.
//!
//! A [`Verifier`] checks a bearer token's signature against the issuer's
//! signing keys (cached in a [`JwksCache`]) and then its issuer, audience and
//! subject. Keys come from any [`sinkproof_ports::KeySource`]: a fixed set
//! ([`StaticKeySource`]) or the issuer's discovery endpoint
//! ([`OidcDiscoveryKeySource`]).

pub mod claims;
pub mod keys;
pub mod verifier;

pub use claims::{Audience, IdentityClaims};
pub use keys::{JwksCache, OidcDiscoveryKeySource, StaticKeySource, discovery_url};
pub use sinkproof_error::IdentityFailure;
pub use verifier::{IdentityOutcome, Verifier, VerifierConfig};
