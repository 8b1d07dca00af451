use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the receiver handled an inbound request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Accepted and acknowledged.
    EventReceived,
    /// Answered with an error status (for example a missing bearer token).
    EventRejected,
}

/// TLS details of the connection a request arrived on.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerTls {
    /// Negotiated protocol version, e.g. `TLSv1_3`.
    pub protocol: Option<String>,
    /// SNI the client sent, if any. Absent when the client dialed an IP.
    pub server_name: Option<String>,
}

/// Security-relevant facts about one request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityContext {
    /// Raw bearer token from the `Authorization` header, without the scheme.
    pub bearer_token: Option<String>,
    /// Present iff the request arrived over TLS.
    pub tls: Option<PeerTls>,
}

impl SecurityContext {
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// One request captured by a receiver.
///
/// Owned by the event store once appended; never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Position in the receiver's log, starting at 0. Assigned on append.
    pub sequence: u64,
    pub receiver: String,
    pub received_at: DateTime<Utc>,
    pub kind: EventKind,
    /// CloudEvents `type` attribute, when the request carried one.
    pub event_type: Option<String>,
    /// CloudEvents `id` attribute.
    pub event_id: Option<String>,
    /// CloudEvents `source` attribute.
    pub event_source: Option<String>,
    /// Response status the receiver answered with.
    pub status_code: u16,
    /// Request headers, lowercased names. Multi-valued headers are joined with `,`.
    pub headers: BTreeMap<String, String>,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    pub security: SecurityContext,
}

impl CapturedEvent {
    /// Starts a record for `receiver`; the store fills in `sequence`.
    pub fn new(receiver: impl Into<String>, kind: EventKind) -> Self {
        Self {
            sequence: 0,
            receiver: receiver.into(),
            received_at: Utc::now(),
            kind,
            event_type: None,
            event_id: None,
            event_source: None,
            status_code: match kind {
                EventKind::EventReceived => 202,
                EventKind::EventRejected => 401,
            },
            headers: BTreeMap::new(),
            payload: Vec::new(),
            security: SecurityContext::default(),
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.security.bearer_token = Some(token.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// CloudEvents extension attribute, from the `ce-<name>` header.
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.header(&format!("ce-{name}"))
    }

    /// Payload parsed as JSON, if it is JSON.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }

    /// Short form used in assertion diagnostics.
    pub fn summary(&self) -> String {
        format!(
            "#{} {:?} type={} token={} tls={}",
            self.sequence,
            self.kind,
            self.event_type.as_deref().unwrap_or("<none>"),
            if self.security.bearer_token.is_some() {
                "present"
            } else {
                "absent"
            },
            self.security.is_tls(),
        )
    }
}

mod payload_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_kind() {
        assert_eq!(
            CapturedEvent::new("sink", EventKind::EventReceived).status_code,
            202
        );
        assert_eq!(
            CapturedEvent::new("sink", EventKind::EventRejected).status_code,
            401
        );
    }

    #[test]
    fn payload_serializes_as_base64() {
        let event = CapturedEvent::new("sink", EventKind::EventReceived).with_payload(b"{}".to_vec());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"], "e30=");

        let back: CapturedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload, b"{}");
    }

    #[test]
    fn headers_are_case_insensitive_on_lookup() {
        let mut event = CapturedEvent::new("sink", EventKind::EventReceived);
        event
            .headers
            .insert("ce-knativearrivaltime".into(), "now".into());
        assert_eq!(event.header("Ce-KnativeArrivalTime"), Some("now"));
        assert_eq!(event.extension("knativearrivaltime"), Some("now"));
    }

    #[test]
    fn summary_mentions_type_and_token() {
        let event = CapturedEvent::new("sink", EventKind::EventReceived)
            .with_type("dev.knative.eventing.timer")
            .with_bearer_token("t");
        let summary = event.summary();
        assert!(summary.contains("dev.knative.eventing.timer"));
        assert!(summary.contains("token=present"));
    }

    #[test]
    fn payload_json_parses_objects() {
        let event = CapturedEvent::new("sink", EventKind::EventReceived)
            .with_payload(br#"{"message":"hello"}"#.to_vec());
        assert_eq!(event.payload_json().unwrap()["message"], "hello");
        let raw = CapturedEvent::new("sink", EventKind::EventReceived).with_payload(b"nope".to_vec());
        assert!(raw.payload_json().is_none());
    }
}
