use crate::claims::{Audience, IdentityClaims};
use crate::keys::JwksCache;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use sinkproof_error::IdentityFailure;
use sinkproof_ports::{KeySource, PrincipalResolver};
use sinkproof_schema::TestScope;
use sinkproof_schema::resource::PrincipalRef;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const ASYMMETRIC: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Verifier settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Expected `iss`, compared verbatim.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Clock skew tolerated on `exp` and `nbf`.
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
    /// How long fetched signing keys are reused.
    #[serde(default = "default_jwks_ttl_secs")]
    pub jwks_ttl_secs: u64,
}

fn default_issuer() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_leeway_secs() -> u64 {
    5
}

fn default_jwks_ttl_secs() -> u64 {
    300
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            leeway_secs: default_leeway_secs(),
            jwks_ttl_secs: default_jwks_ttl_secs(),
        }
    }
}

impl VerifierConfig {
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn jwks_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_ttl_secs)
    }
}

/// Result of verifying one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    Valid(IdentityClaims),
    Invalid(IdentityFailure),
}

impl IdentityOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, IdentityOutcome::Valid(_))
    }

    pub fn failure(&self) -> Option<&IdentityFailure> {
        match self {
            IdentityOutcome::Valid(_) => None,
            IdentityOutcome::Invalid(f) => Some(f),
        }
    }

    /// `valid`, or the failure label.
    pub fn label(&self) -> &'static str {
        match self {
            IdentityOutcome::Valid(_) => "valid",
            IdentityOutcome::Invalid(f) => f.label(),
        }
    }

    pub fn into_result(self) -> Result<IdentityClaims, IdentityFailure> {
        match self {
            IdentityOutcome::Valid(claims) => Ok(claims),
            IdentityOutcome::Invalid(f) => Err(f),
        }
    }
}

impl From<Result<IdentityClaims, IdentityFailure>> for IdentityOutcome {
    fn from(result: Result<IdentityClaims, IdentityFailure>) -> Self {
        match result {
            Ok(claims) => IdentityOutcome::Valid(claims),
            Err(f) => IdentityOutcome::Invalid(f),
        }
    }
}

/// Checks bearer tokens against one issuer.
///
/// Order of checks: header, signature (with `exp`/`nbf`), issuer, audience,
/// subject. The first failing check decides the outcome.
pub struct Verifier {
    config: VerifierConfig,
    keys: JwksCache,
    resolver: Option<Arc<dyn PrincipalResolver>>,
}

impl Verifier {
    pub fn new(config: VerifierConfig, source: Arc<dyn KeySource>) -> Self {
        let keys = JwksCache::new(source, config.jwks_ttl());
        Self {
            config,
            keys,
            resolver: None,
        }
    }

    /// Resolver used to turn the expected principal into a subject.
    pub fn with_resolver(mut self, resolver: Arc<dyn PrincipalResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn keys(&self) -> &JwksCache {
        &self.keys
    }

    /// Verifies `token` was issued to `expected_audience` for `principal`.
    pub async fn verify(
        &self,
        scope: &TestScope,
        token: &str,
        expected_audience: &str,
        principal: &PrincipalRef,
    ) -> IdentityOutcome {
        let outcome: IdentityOutcome = async {
            let claims = self.verify_token(token, expected_audience).await?;
            let subject = self.resolve_subject(scope, principal).await?;
            check_subject(&claims, &subject)?;
            Ok::<_, IdentityFailure>(claims)
        }
        .await
        .into();
        tracing::debug!(
            principal = %principal.name,
            audience = expected_audience,
            outcome = outcome.label(),
            "verified identity token"
        );
        outcome
    }

    /// Like [`Verifier::verify`] with an already known subject; `None` skips the subject check.
    pub async fn verify_with_subject(
        &self,
        token: &str,
        expected_audience: &str,
        expected_subject: Option<&str>,
    ) -> IdentityOutcome {
        async {
            let claims = self.verify_token(token, expected_audience).await?;
            if let Some(subject) = expected_subject {
                check_subject(&claims, subject)?;
            }
            Ok::<_, IdentityFailure>(claims)
        }
        .await
        .into()
    }

    async fn verify_token(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<IdentityClaims, IdentityFailure> {
        let header = decode_header(token).map_err(|e| IdentityFailure::Malformed {
            reason: format!("undecodable header: {e}"),
        })?;
        if !ASYMMETRIC.contains(&header.alg) {
            return Err(IdentityFailure::Malformed {
                reason: format!("algorithm {:?} is not an asymmetric signature", header.alg),
            });
        }

        let claims = self.verify_signature(token, &header).await?;

        if claims.iss.as_deref() != Some(self.config.issuer.as_str()) {
            return Err(IdentityFailure::IssuerMismatch {
                expected: self.config.issuer.clone(),
                actual: claims.iss.clone(),
            });
        }

        match &claims.aud {
            Some(aud) if aud.matches_exactly(expected_audience) => {}
            other => {
                return Err(IdentityFailure::AudienceMismatch {
                    expected: expected_audience.to_string(),
                    actual: other.as_ref().map(Audience::display),
                });
            }
        }

        Ok(claims)
    }

    async fn verify_signature(
        &self,
        token: &str,
        header: &Header,
    ) -> Result<IdentityClaims, IdentityFailure> {
        let candidates: Vec<Jwk> = match &header.kid {
            Some(kid) => match self.keys.find(kid).await.map_err(keys_unavailable)? {
                Some(jwk) => vec![jwk],
                None => {
                    return Err(IdentityFailure::SignatureInvalid {
                        reason: format!("no signing key with kid {kid:?}"),
                    });
                }
            },
            None => self.keys.keys(false).await.map_err(keys_unavailable)?.keys.clone(),
        };

        let validation = self.validation(header.alg);
        let mut last_error = None;
        for jwk in &candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    last_error = Some(format!("unusable key: {e}"));
                    continue;
                }
            };
            match decode::<IdentityClaims>(token, &key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => match claim_failure(&e) {
                    Some(failure) => return Err(failure),
                    None => last_error = Some(e.to_string()),
                },
            }
        }

        Err(IdentityFailure::SignatureInvalid {
            reason: last_error.unwrap_or_else(|| "issuer publishes no signing keys".to_string()),
        })
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.config.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);
        validation
    }

    async fn resolve_subject(
        &self,
        scope: &TestScope,
        principal: &PrincipalRef,
    ) -> Result<String, IdentityFailure> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| IdentityFailure::SubjectUnresolved {
                reason: "no principal resolver configured".to_string(),
            })?;
        resolver
            .resolve_subject(scope, principal)
            .await
            .map_err(|e| IdentityFailure::SubjectUnresolved {
                reason: format!("{}/{}: {e:#}", principal.kind, principal.name),
            })
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

fn check_subject(claims: &IdentityClaims, expected: &str) -> Result<(), IdentityFailure> {
    if claims.sub.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(IdentityFailure::SubjectMismatch {
            expected: expected.to_string(),
            actual: claims.sub.clone(),
        })
    }
}

fn keys_unavailable(err: anyhow::Error) -> IdentityFailure {
    IdentityFailure::KeysUnavailable {
        reason: format!("{err:#}"),
    }
}

/// Failures that do not depend on which key was tried.
///
/// `None` means the key did not verify the signature and the next one may.
fn claim_failure(err: &JwtError) -> Option<IdentityFailure> {
    match err.kind() {
        ErrorKind::ExpiredSignature => Some(IdentityFailure::Expired),
        ErrorKind::ImmatureSignature => Some(IdentityFailure::NotYetValid),
        ErrorKind::MissingRequiredClaim(claim) => Some(IdentityFailure::Malformed {
            reason: format!("missing required claim {claim:?}"),
        }),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Some(IdentityFailure::Malformed {
            reason: err.to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: VerifierConfig =
            serde_json::from_str(r#"{"issuer":"https://issuer.example"}"#).unwrap();
        assert_eq!(config.issuer, "https://issuer.example");
        assert_eq!(config.leeway_secs, 5);
        assert_eq!(config.jwks_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(
            IdentityOutcome::Invalid(IdentityFailure::Expired).label(),
            "expired"
        );
        let valid = IdentityOutcome::Valid(IdentityClaims {
            iss: None,
            aud: None,
            sub: None,
            exp: None,
            nbf: None,
            iat: None,
        });
        assert!(valid.is_valid());
        assert!(valid.into_result().is_ok());
    }

    #[test]
    fn expiry_errors_are_not_retried_with_other_keys() {
        let expired = JwtError::from(ErrorKind::ExpiredSignature);
        assert_eq!(claim_failure(&expired), Some(IdentityFailure::Expired));

        let signature = JwtError::from(ErrorKind::InvalidSignature);
        assert_eq!(claim_failure(&signature), None);
    }

    #[test]
    fn hmac_is_not_asymmetric() {
        assert!(!ASYMMETRIC.contains(&Algorithm::HS256));
        assert!(ASYMMETRIC.contains(&Algorithm::ES256));
    }
}
