//! Shared data model for sinkproof.
//!
//! - [`event`]: what a receiver captured.
//! - [`feature`]: phases, grades, and the outcome of running a feature.
//! - [`resource`]: install options and the status reported for installed resources.

pub mod event;
pub mod feature;
pub mod resource;

pub use sinkproof_ids::{ResourceName, RunId};

use serde::{Deserialize, Serialize};

/// The scope every collaborator call runs in.
///
/// Carries what used to be ambient test state (namespace, run id) so it can be
/// passed explicitly and its lifetime tied to one feature run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScope {
    pub namespace: String,
    pub run_id: RunId,
}

impl TestScope {
    pub fn new(namespace: impl Into<String>, run_id: RunId) -> Self {
        Self {
            namespace: namespace.into(),
            run_id,
        }
    }

    /// A fresh scope with a random namespace derived from `prefix`.
    pub fn random(prefix: &str) -> Self {
        Self {
            namespace: sinkproof_ids::make_random_k8s_name(prefix).into_string(),
            run_id: RunId::now(prefix),
        }
    }
}
