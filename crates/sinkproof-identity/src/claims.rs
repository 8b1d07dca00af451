use serde::{Deserialize, Serialize};

/// The `aud` claim: a single value or a list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// Exact match. A list counts only when it holds exactly `expected` and nothing else.
    pub fn matches_exactly(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.len() == 1 && auds[0] == expected,
        }
    }

    /// Rendering used in mismatch reports.
    pub fn display(&self) -> String {
        match self {
            Audience::One(aud) => aud.clone(),
            Audience::Many(auds) => format!("[{}]", auds.join(",")),
        }
    }
}

/// Claims of a verified token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}
