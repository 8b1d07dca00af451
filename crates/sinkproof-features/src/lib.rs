//! Features for sinkproof.
//!
//! Reusable steps (feature-flag prerequisites, receivers, source status
//! expectations) and the features built from them.

pub mod eventshub;
pub mod featureflags;
pub mod integration_source;
pub mod principal;
pub mod source;

pub use principal::ResourcePrincipalResolver;

use sinkproof_engine::Feature;

/// Every feature this crate provides, with fresh resource names.
pub fn all() -> Vec<Feature> {
    vec![
        integration_source::sends_events_with_sink_ref_oidc(),
        integration_source::sends_events_with_tls(),
    ]
}
