//! The explicit context every step runs against.

use anyhow::{Result, anyhow};
use sinkproof_assert::{MatchContext, PollConfig};
use sinkproof_cancel::CancelSignal;
use sinkproof_identity::{Verifier, VerifierConfig};
use sinkproof_ports::{
    EnvironmentFlags, KeySource, PrincipalResolver, ResourceInstaller, TransportProvider,
};
use sinkproof_schema::TestScope;
use sinkproof_store::EventStore;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// The environment a feature talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub installer: Arc<dyn ResourceInstaller>,
    pub transport: Arc<dyn TransportProvider>,
    pub keys: Arc<dyn KeySource>,
    pub principals: Arc<dyn PrincipalResolver>,
    pub flags: Arc<dyn EnvironmentFlags>,
}

/// Values handed from one step to a later one, keyed by name and type.
#[derive(Clone, Default)]
pub struct StateBag {
    values: Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl StateBag {
    /// Stores `value` under `key`, replacing whatever was there.
    pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.lock().insert(key.to_string(), Arc::new(value));
    }

    /// The value under `key`, if present and of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.lock()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Like [`StateBag::get`], as an error naming the missing key.
    pub fn require<T: Any + Send + Sync + Clone>(&self, key: &str) -> Result<T> {
        self.get(key).ok_or_else(|| {
            anyhow!(
                "state {key:?} of type {} was not set by an earlier step",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Any + Send + Sync>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StateBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        f.debug_struct("StateBag").field("keys", &keys).finish()
    }
}

/// Everything a step can reach. Cloning shares the store, state and collaborators.
#[derive(Clone)]
pub struct FeatureContext {
    pub scope: TestScope,
    pub cancel: CancelSignal,
    pub store: EventStore,
    pub poll: PollConfig,
    pub collaborators: Collaborators,
    pub verifier: Arc<Verifier>,
    pub state: StateBag,
}

impl FeatureContext {
    /// A context with a fresh store and state, default polling, and a verifier
    /// for the default issuer built from the collaborators' keys and resolver.
    pub fn new(scope: TestScope, collaborators: Collaborators) -> Self {
        let verifier = Self::build_verifier(VerifierConfig::default(), &collaborators);
        Self {
            scope,
            cancel: CancelSignal::new(),
            store: EventStore::new(),
            poll: PollConfig::default(),
            collaborators,
            verifier,
            state: StateBag::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_verifier_config(mut self, config: VerifierConfig) -> Self {
        self.verifier = Self::build_verifier(config, &self.collaborators);
        self
    }

    fn build_verifier(config: VerifierConfig, collaborators: &Collaborators) -> Arc<Verifier> {
        Arc::new(
            Verifier::new(config, collaborators.keys.clone())
                .with_resolver(collaborators.principals.clone()),
        )
    }

    pub fn installer(&self) -> &dyn ResourceInstaller {
        self.collaborators.installer.as_ref()
    }

    pub fn transport(&self) -> &dyn TransportProvider {
        self.collaborators.transport.as_ref()
    }

    pub fn flags(&self) -> &dyn EnvironmentFlags {
        self.collaborators.flags.as_ref()
    }

    pub fn principals(&self) -> &dyn PrincipalResolver {
        self.collaborators.principals.as_ref()
    }

    /// The view assertions evaluate against.
    pub fn match_context(&self) -> MatchContext {
        MatchContext::new(self.scope.clone(), self.store.clone()).with_verifier(self.verifier.clone())
    }
}

impl std::fmt::Debug for FeatureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureContext")
            .field("scope", &self.scope)
            .field("cancel", &self.cancel)
            .field("store", &self.store)
            .field("poll", &self.poll)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bag_is_typed() {
        let bag = StateBag::default();
        bag.insert("ca", "PEM".to_string());
        assert_eq!(bag.get::<String>("ca").as_deref(), Some("PEM"));
        assert!(bag.get::<u32>("ca").is_none());
        assert!(bag.require::<u32>("ca").is_err());
        assert!(bag.require::<String>("missing").is_err());
        assert!(bag.contains("ca"));
    }

    #[test]
    fn state_bag_clones_share_values() {
        let bag = StateBag::default();
        let other = bag.clone();
        other.insert("n", 3u32);
        assert_eq!(bag.get::<u32>("n"), Some(3));
        assert_eq!(format!("{bag:?}"), "StateBag { keys: [\"n\"] }");
    }
}
