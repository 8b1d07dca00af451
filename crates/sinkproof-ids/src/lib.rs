use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kubernetes object names are DNS-1123 labels: at most 63 characters.
pub const MAX_NAME_LEN: usize = 63;

/// Length of the random suffix appended by [`make_random_k8s_name`].
const SUFFIX_LEN: usize = 8;

static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A resource name that is safe to use as a Kubernetes object name.
///
/// Every resource a feature installs (receivers, sources, namespaces) gets one
/// of these, so two features running side by side never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    /// Accepts `name` only if it is a valid DNS-1123 label.
    pub fn parse(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        is_dns1123_label(&name).then_some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

/// Identifies one engine run (a suite, or a single feature run on its own).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl RunId {
    /// Non-deterministic enough to avoid collisions without dragging in UUID/rand.
    pub fn now(prefix: &str) -> Self {
        RunId(format!("{prefix}_{}", unique_nanos()))
    }
}

/// Builds a random, DNS-1123 compliant name from `prefix`.
///
/// The prefix is lowercased, characters outside `[a-z0-9-]` become `-`, and the
/// result is trimmed so that `prefix-xxxxxxxx` fits in [`MAX_NAME_LEN`].
pub fn make_random_k8s_name(prefix: &str) -> ResourceName {
    let suffix = &hash_hex([prefix, &unique_nanos().to_string()])[..SUFFIX_LEN];

    let mut base: String = prefix
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    base.truncate(MAX_NAME_LEN - SUFFIX_LEN - 1);
    let base = base.trim_matches('-');

    if base.is_empty() {
        // Labels must start with an alphanumeric; the hex suffix may start with a digit, which is fine.
        ResourceName(suffix.to_string())
    } else {
        ResourceName(format!("{base}-{suffix}"))
    }
}

/// Checks the RFC 1123 label rules Kubernetes applies to most object names.
pub fn is_dns1123_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
        return false;
    }
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| edge_ok(b) || b == b'-')
}

/// Nanosecond timestamp mixed with a process-wide counter, so names minted in
/// the same tick still differ.
fn unique_nanos() -> u128 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    nanos + u128::from(NAME_COUNTER.fetch_add(1, Ordering::Relaxed))
}

fn hash_hex(parts: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let mut hasher = Sha256::new();
    for (i, p) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(p.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_names_keep_prefix() {
        let name = make_random_k8s_name("integrationsource");
        assert!(name.as_str().starts_with("integrationsource-"));
        assert_eq!(name.as_str().len(), "integrationsource-".len() + SUFFIX_LEN);
    }

    #[test]
    fn random_names_differ() {
        let a = make_random_k8s_name("sink");
        let b = make_random_k8s_name("sink");
        assert_ne!(a, b);
    }

    #[test]
    fn random_names_sanitize_prefix() {
        let name = make_random_k8s_name("My_Sink.Name");
        assert!(name.as_str().starts_with("my-sink-name-"));
        assert!(is_dns1123_label(name.as_str()));
    }

    #[test]
    fn random_names_fit_label_limit() {
        let name = make_random_k8s_name(&"a".repeat(200));
        assert_eq!(name.as_str().len(), MAX_NAME_LEN);
        assert!(is_dns1123_label(name.as_str()));
    }

    #[test]
    fn empty_prefix_still_valid() {
        let name = make_random_k8s_name("---");
        assert!(is_dns1123_label(name.as_str()));
    }

    #[test]
    fn label_rules() {
        assert!(is_dns1123_label("sink"));
        assert!(is_dns1123_label("sink-1"));
        assert!(!is_dns1123_label(""));
        assert!(!is_dns1123_label("-sink"));
        assert!(!is_dns1123_label("sink-"));
        assert!(!is_dns1123_label("Sink"));
        assert!(!is_dns1123_label("sink.local"));
        assert!(!is_dns1123_label(&"a".repeat(64)));
    }

    #[test]
    fn parse_rejects_invalid() {
        assert!(ResourceName::parse("ok-name").is_some());
        assert!(ResourceName::parse("Not_OK").is_none());
    }

    #[test]
    fn run_id_has_prefix() {
        let id = RunId::now("suite");
        assert!(id.to_string().starts_with("suite_"));
    }
}
