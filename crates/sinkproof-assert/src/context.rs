//! The view of a run that assertions evaluate against.

use sinkproof_identity::Verifier;
use sinkproof_schema::TestScope;
use sinkproof_store::EventStore;
use std::sync::Arc;

/// What assertions read from: the run's scope, its store, and the verifier
/// for identity checks.
#[derive(Clone)]
pub struct MatchContext {
    pub scope: TestScope,
    pub store: EventStore,
    pub verifier: Option<Arc<Verifier>>,
}

impl MatchContext {
    pub fn new(scope: TestScope, store: EventStore) -> Self {
        Self {
            scope,
            store,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

impl std::fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchContext")
            .field("namespace", &self.scope.namespace)
            .field("receivers", &self.store.receivers())
            .field("has_verifier", &self.verifier.is_some())
            .finish()
    }
}
