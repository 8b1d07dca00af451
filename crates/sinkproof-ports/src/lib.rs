use anyhow::Result;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use sinkproof_schema::TestScope;
use sinkproof_schema::resource::{
    Gvr, InstallOptions, PrincipalRef, ReceiverEndpoint, ReceiverOptions, ResourceStatus,
};
use sinkproof_store::EventStore;

/// Installs and inspects resources in the environment under test.
///
/// The engine never talks to a cluster directly; a real deployment plugs a
/// cluster client in here, tests use an in-memory one.
#[async_trait]
pub trait ResourceInstaller: Send + Sync {
    async fn install_source(
        &self,
        scope: &TestScope,
        gvr: &Gvr,
        name: &str,
        options: &InstallOptions,
    ) -> Result<()>;

    async fn status(&self, scope: &TestScope, gvr: &Gvr, name: &str) -> Result<ResourceStatus>;

    /// Deleting a resource that does not exist is not an error.
    async fn delete(&self, scope: &TestScope, gvr: &Gvr, name: &str) -> Result<()>;
}

/// Starts endpoints that capture whatever is sent to them.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Starts a receiver named `name` appending every request to `store`.
    async fn start_receiver(
        &self,
        scope: &TestScope,
        store: &EventStore,
        name: &str,
        options: &ReceiverOptions,
    ) -> Result<ReceiverEndpoint>;

    async fn stop_receiver(&self, scope: &TestScope, name: &str) -> Result<()>;
}

/// Maps a workload to the subject its identity tokens carry.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve_subject(&self, scope: &TestScope, principal: &PrincipalRef) -> Result<String>;
}

/// Current signing keys of a token issuer.
///
/// Implementations fetch on every call; caching is the caller's concern.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_keys(&self) -> Result<JwkSet>;
}

/// How strictly the environment enforces transport encryption.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportEncryption {
    #[default]
    Disabled,
    Permissive,
    Strict,
}

/// Feature flags of the environment under test.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    pub authentication_oidc: bool,
    pub transport_encryption: TransportEncryption,
    pub istio_enabled: bool,
}

impl FeatureFlags {
    pub fn is_oidc_enabled(&self) -> bool {
        self.authentication_oidc
    }

    pub fn is_transport_encryption_strict(&self) -> bool {
        self.transport_encryption == TransportEncryption::Strict
    }

    pub fn is_istio_enabled(&self) -> bool {
        self.istio_enabled
    }
}

/// Source of the environment's feature flags.
#[async_trait]
pub trait EnvironmentFlags: Send + Sync {
    async fn flags(&self, scope: &TestScope) -> Result<FeatureFlags>;
}

/// Fixed flags, for environments configured up front.
#[async_trait]
impl EnvironmentFlags for FeatureFlags {
    async fn flags(&self, _scope: &TestScope) -> Result<FeatureFlags> {
        Ok(self.clone())
    }
}
