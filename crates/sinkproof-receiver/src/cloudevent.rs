//! CloudEvents HTTP binding, as much of it as the receiver and sender need.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use std::collections::BTreeMap;

pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";
pub const SPEC_VERSION: &str = "1.0";

/// Context attributes the receiver records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    pub event_type: Option<String>,
    pub id: Option<String>,
    pub source: Option<String>,
}

/// Reads attributes from `ce-*` headers (binary mode) or from the JSON
/// envelope (structured mode).
pub fn extract(headers: &HeaderMap, body: &[u8]) -> Attributes {
    let structured = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(STRUCTURED_CONTENT_TYPE));

    if structured {
        let Ok(envelope) = serde_json::from_slice::<serde_json::Value>(body) else {
            return Attributes::default();
        };
        let field = |name: &str| envelope.get(name).and_then(|v| v.as_str()).map(str::to_string);
        return Attributes {
            event_type: field("type"),
            id: field("id"),
            source: field("source"),
        };
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Attributes {
        event_type: header("ce-type"),
        id: header("ce-id"),
        source: header("ce-source"),
    }
}

/// Token from an `Authorization: Bearer <token>` header. The scheme is case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Lowercased header names; repeated headers joined with `,`.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}
