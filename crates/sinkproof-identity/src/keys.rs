use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::Deserialize;
use sinkproof_ports::KeySource;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Serves a fixed key set. `replace` swaps it, which is how tests rotate keys.
#[derive(Debug)]
pub struct StaticKeySource {
    jwks: RwLock<JwkSet>,
}

impl Default for StaticKeySource {
    fn default() -> Self {
        Self::new(JwkSet { keys: Vec::new() })
    }
}

impl StaticKeySource {
    pub fn new(jwks: JwkSet) -> Self {
        Self {
            jwks: RwLock::new(jwks),
        }
    }

    pub fn replace(&self, jwks: JwkSet) {
        *self.jwks.write().unwrap_or_else(PoisonError::into_inner) = jwks;
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_keys(&self) -> Result<JwkSet> {
        Ok(self
            .jwks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: Option<String>,
    jwks_uri: String,
}

/// Fetches keys the way an OIDC relying party does: discovery document
/// first, then its `jwks_uri`.
#[derive(Debug, Clone)]
pub struct OidcDiscoveryKeySource {
    issuer: String,
    discovery_url: Url,
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl OidcDiscoveryKeySource {
    pub fn new(issuer: &str) -> Result<Self> {
        Self::with_client(issuer, reqwest::Client::new())
    }

    pub fn with_client(issuer: &str, client: reqwest::Client) -> Result<Self> {
        let discovery_url = discovery_url(issuer)?;
        Ok(Self {
            issuer: issuer.to_string(),
            discovery_url,
            client,
            bearer_token: None,
        })
    }

    /// Trusts `pem` in addition to the system roots, for in-cluster issuers.
    pub fn with_ca_pem(issuer: &str, pem: &[u8]) -> Result<Self> {
        let cert = reqwest::Certificate::from_pem(pem).context("parse issuer CA bundle")?;
        let client = reqwest::Client::builder()
            .add_root_certificate(cert)
            .build()
            .context("build discovery client")?;
        Self::with_client(issuer, client)
    }

    /// Sends `token` as a bearer credential on both requests.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("parse response of {url}"))
    }
}

#[async_trait]
impl KeySource for OidcDiscoveryKeySource {
    async fn fetch_keys(&self) -> Result<JwkSet> {
        let doc: DiscoveryDocument = self.get_json(self.discovery_url.as_str()).await?;
        if let Some(advertised) = doc.issuer.as_deref()
            && advertised.trim_end_matches('/') != self.issuer.trim_end_matches('/')
        {
            tracing::warn!(
                configured = %self.issuer,
                advertised,
                "discovery document advertises a different issuer"
            );
        }
        let jwks: JwkSet = self.get_json(&doc.jwks_uri).await?;
        tracing::debug!(keys = jwks.keys.len(), jwks_uri = %doc.jwks_uri, "fetched signing keys");
        Ok(jwks)
    }
}

/// `<issuer>/.well-known/openid-configuration`.
pub fn discovery_url(issuer: &str) -> Result<Url> {
    let base = issuer.trim_end_matches('/');
    Url::parse(&format!("{base}/.well-known/openid-configuration"))
        .with_context(|| format!("invalid issuer URL {issuer:?}"))
}

struct Cached {
    jwks: Arc<JwkSet>,
    fetched_at: Instant,
}

/// TTL cache in front of a [`KeySource`].
///
/// Concurrent refreshes are serialized; the second caller sees the first
/// caller's result.
pub struct JwksCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    state: Mutex<Option<Cached>>,
}

impl JwksCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Current keys, fetched when the cache is empty, stale, or `force` is set.
    pub async fn keys(&self, force: bool) -> Result<Arc<JwkSet>> {
        let mut state = self.state.lock().await;
        if !force
            && let Some(cached) = state.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.jwks.clone());
        }
        let jwks = Arc::new(self.source.fetch_keys().await?);
        *state = Some(Cached {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }

    /// Key with id `kid`. An unknown id forces one refresh before giving up.
    pub async fn find(&self, kid: &str) -> Result<Option<Jwk>> {
        if let Some(jwk) = self.keys(false).await?.find(kid) {
            return Ok(Some(jwk.clone()));
        }
        tracing::debug!(kid, "unknown key id, refreshing signing keys");
        Ok(self.keys(true).await?.find(kid).cloned())
    }

    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jwk(kid: &str) -> Jwk {
        serde_json::from_value(serde_json::json!({
            "kty": "EC",
            "crv": "P-256",
            "kid": kid,
            "x": "WKn-ZIGevcwGIyyrzFoZNBdaq9_TsqzGl96oc0CWuis",
            "y": "y77t-RvAHRKTsSGdIYUfweuOvwrvDD-Q3Hv5J0fSKbE",
        }))
        .unwrap()
    }

    struct Counting {
        calls: AtomicUsize,
        inner: StaticKeySource,
    }

    #[async_trait]
    impl KeySource for Counting {
        async fn fetch_keys(&self) -> Result<JwkSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_keys().await
        }
    }

    fn counting(kids: &[&str]) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            inner: StaticKeySource::new(JwkSet {
                keys: kids.iter().map(|k| jwk(k)).collect(),
            }),
        })
    }

    #[test]
    fn discovery_url_appends_well_known() {
        assert_eq!(
            discovery_url("https://issuer.example/").unwrap().as_str(),
            "https://issuer.example/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://kubernetes.default.svc").unwrap().as_str(),
            "https://kubernetes.default.svc/.well-known/openid-configuration"
        );
        assert!(discovery_url("not a url").is_err());
    }

    #[tokio::test]
    async fn default_static_source_serves_no_keys_until_replaced() {
        let source = StaticKeySource::default();
        assert!(source.fetch_keys().await.unwrap().keys.is_empty());
        source.replace(JwkSet {
            keys: vec![jwk("a")],
        });
        assert!(source.fetch_keys().await.unwrap().find("a").is_some());
    }

    #[tokio::test]
    async fn cache_serves_within_ttl() {
        let source = counting(&["a"]);
        let cache = JwksCache::new(source.clone(), Duration::from_secs(60));
        cache.keys(false).await.unwrap();
        cache.keys(false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cache.keys(true).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_refetches_after_ttl() {
        let source = counting(&["a"]);
        let cache = JwksCache::new(source.clone(), Duration::from_secs(10));
        cache.keys(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.keys(false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_kid_refreshes_once() {
        let source = counting(&["a"]);
        let cache = JwksCache::new(source.clone(), Duration::from_secs(60));
        assert!(cache.find("a").await.unwrap().is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert!(cache.find("b").await.unwrap().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        source.inner.replace(JwkSet {
            keys: vec![jwk("a"), jwk("b")],
        });
        assert!(cache.find("b").await.unwrap().is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }
}
