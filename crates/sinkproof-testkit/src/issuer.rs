//! A token issuer for tests: one ECDSA P-256 key, its JWKS, and token minting.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rcgen::KeyPair;
use serde_json::{Map, Value, json};

/// What goes into a minted token. Offsets are seconds relative to now.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenSpec {
    /// Overrides the issuer's own URL.
    pub issuer: Option<String>,
    pub audience: Option<Value>,
    pub subject: Option<String>,
    /// `None` leaves `exp` out.
    pub expires_in: Option<i64>,
    pub not_before_in: Option<i64>,
    /// Overrides the key id in the header.
    pub kid: Option<String>,
    pub omit_kid: bool,
}

impl TokenSpec {
    /// A token for `audience` and `subject`, valid for an hour.
    pub fn new(audience: &str, subject: &str) -> Self {
        Self {
            issuer: None,
            audience: Some(json!(audience)),
            subject: Some(subject.to_string()),
            expires_in: Some(3600),
            not_before_in: None,
            kid: None,
            omit_kid: false,
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    pub fn with_audiences(mut self, audiences: &[&str]) -> Self {
        self.audience = Some(json!(audiences));
        self
    }

    pub fn without_audience(mut self) -> Self {
        self.audience = None;
        self
    }

    pub fn expires_in(mut self, secs: i64) -> Self {
        self.expires_in = Some(secs);
        self
    }

    pub fn without_exp(mut self) -> Self {
        self.expires_in = None;
        self
    }

    pub fn not_before_in(mut self, secs: i64) -> Self {
        self.not_before_in = Some(secs);
        self
    }

    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    pub fn without_kid(mut self) -> Self {
        self.omit_kid = true;
        self
    }
}

/// Signs tokens the way a cluster's service-account issuer would.
pub struct TestIssuer {
    issuer: String,
    kid: String,
    encoding: EncodingKey,
    jwk: Jwk,
}

impl TestIssuer {
    pub fn new(issuer: &str) -> Self {
        let kid = sinkproof_ids::make_random_k8s_name("key").into_string();
        Self::with_kid(issuer, &kid)
    }

    pub fn with_kid(issuer: &str, kid: &str) -> Self {
        let key = KeyPair::generate().expect("generate P-256 key");
        let encoding =
            EncodingKey::from_ec_pem(key.serialize_pem().as_bytes()).expect("load signing key");

        // Uncompressed SEC1 point: 0x04 || x || y.
        let point = key.public_key_raw();
        assert_eq!(point.len(), 65, "unexpected P-256 public key encoding");
        let jwk: Jwk = serde_json::from_value(json!({
            "kty": "EC",
            "crv": "P-256",
            "use": "sig",
            "alg": "ES256",
            "kid": kid,
            "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&point[33..65]),
        }))
        .expect("build JWK");

        Self {
            issuer: issuer.to_string(),
            kid: kid.to_string(),
            encoding,
            jwk,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn jwk(&self) -> Jwk {
        self.jwk.clone()
    }

    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }

    /// An hour-long token for `audience` and `subject`.
    pub fn token(&self, audience: &str, subject: &str) -> String {
        self.mint(&TokenSpec::new(audience, subject))
    }

    pub fn mint(&self, spec: &TokenSpec) -> String {
        let now = Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert(
            "iss".into(),
            json!(spec.issuer.as_deref().unwrap_or(&self.issuer)),
        );
        if let Some(aud) = &spec.audience {
            claims.insert("aud".into(), aud.clone());
        }
        if let Some(sub) = &spec.subject {
            claims.insert("sub".into(), json!(sub));
        }
        claims.insert("iat".into(), json!(now));
        if let Some(exp) = spec.expires_in {
            claims.insert("exp".into(), json!(now + exp));
        }
        if let Some(nbf) = spec.not_before_in {
            claims.insert("nbf".into(), json!(now + nbf));
        }

        let mut header = Header::new(Algorithm::ES256);
        if !spec.omit_kid {
            header.kid = Some(spec.kid.clone().unwrap_or_else(|| self.kid.clone()));
        }
        jsonwebtoken::encode(&header, &Value::Object(claims), &self.encoding).expect("sign token")
    }
}

impl std::fmt::Debug for TestIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestIssuer")
            .field("issuer", &self.issuer)
            .field("kid", &self.kid)
            .finish()
    }
}
