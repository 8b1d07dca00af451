use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Group, version and plural resource name of a cluster resource type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

/// Reference to a cluster object by kind and name.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl KReference {
    /// A core `v1` Service, the usual way a receiver is addressed.
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            api_version: "v1".into(),
            kind: "Service".into(),
            name: name.into(),
            namespace: None,
        }
    }
}

/// Where a source delivers its events.
///
/// Either `uri` or `reference` must be set; when both are, the URI is resolved
/// relative to the reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    /// Absolute or relative URI of the sink.
    pub uri: Option<String>,
    /// Object whose address the sink resolves to.
    pub reference: Option<KReference>,
    /// PEM bundle the source must trust when dialing an `https` sink.
    pub ca_certs: Option<String>,
    /// Audience the source must request its identity token for. Enables OIDC.
    pub audience: Option<String>,
}

impl Destination {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    pub fn reference(reference: KReference) -> Self {
        Self {
            reference: Some(reference),
            ..Self::default()
        }
    }

    pub fn with_ca_certs(mut self, pem: impl Into<String>) -> Self {
        self.ca_certs = Some(pem.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn is_https(&self) -> bool {
        self.uri
            .as_deref()
            .is_some_and(|u| u.to_ascii_lowercase().starts_with("https://"))
    }
}

/// Settings for timer-driven sources.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerOptions {
    /// Delay between two events.
    pub period_ms: u64,
    /// Body of each event.
    pub message: String,
    /// Stop after this many events; `None` keeps sending until the resource is deleted.
    pub repeat: Option<u32>,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            message: "Hello, sinkproof!".into(),
            repeat: None,
        }
    }
}

impl TimerOptions {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Everything a resource installer needs to install a source.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallOptions {
    pub sink: Option<Destination>,
    pub timer: TimerOptions,
}

impl InstallOptions {
    pub fn with_sink(mut self, sink: Destination) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_timer(mut self, timer: TimerOptions) -> Self {
        self.timer = timer;
        self
    }
}

/// How a receiver endpoint is started.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// Audience tokens presented to this receiver are expected to carry.
    /// When set, requests without a bearer token are rejected.
    pub audience: Option<String>,
    /// Serve over TLS with freshly issued certificates.
    pub tls: bool,
}

impl ReceiverOptions {
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }
}

/// Address of a running receiver.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverEndpoint {
    pub name: String,
    pub uri: String,
    /// PEM bundle of the CA that signed the receiver's certificate, if TLS.
    pub ca_certs: Option<String>,
    pub audience: Option<String>,
}

impl ReceiverEndpoint {
    /// A destination pointing at this receiver, carrying its CA and audience.
    pub fn as_destination(&self) -> Destination {
        Destination {
            uri: Some(self.uri.clone()),
            reference: Some(KReference::service(self.name.clone())),
            ca_certs: self.ca_certs.clone(),
            audience: self.audience.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    pub condition_type: String,
    pub status: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Observed status of an installed resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStatus {
    pub ready: bool,
    /// Resolved sink address.
    pub sink_uri: Option<String>,
    /// CA bundle the resource uses when dialing the sink.
    pub sink_ca_certs: Option<String>,
    pub sink_audience: Option<String>,
    /// Service account the resource's data plane authenticates as.
    pub service_account_name: Option<String>,
    pub conditions: Vec<Condition>,
}

impl ResourceStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Human-readable reason the resource is not ready.
    pub fn not_ready_reason(&self) -> Option<String> {
        if self.ready {
            return None;
        }
        let failing: Vec<String> = self
            .conditions
            .iter()
            .filter(|c| !c.status)
            .map(|c| match &c.message {
                Some(m) => format!("{}: {m}", c.condition_type),
                None => c.condition_type.clone(),
            })
            .collect();
        Some(if failing.is_empty() {
            "not ready".to_string()
        } else {
            failing.join("; ")
        })
    }
}

/// Workload identity a token subject is expected to belong to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PrincipalRef {
    /// Kind of resource owning the identity, e.g. `IntegrationSource`.
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl PrincipalRef {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Token subject Kubernetes issues for a service account.
pub fn service_account_subject(namespace: &str, service_account: &str) -> String {
    format!("system:serviceaccount:{namespace}:{service_account}")
}

/// Name of the service account created for the OIDC identity of resource
/// `name` of type `gvr`: `<name>-oidc-<group>-<resource>`.
pub fn oidc_service_account_name(gvr: &Gvr, name: &str) -> String {
    if gvr.group.is_empty() {
        format!("{name}-oidc-{}", gvr.resource)
    } else {
        format!("{name}-oidc-{}-{}", gvr.group, gvr.resource)
    }
}
