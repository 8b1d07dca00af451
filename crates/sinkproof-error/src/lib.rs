//! Error types for sinkproof.
//!
//! Step bodies and collaborators return `anyhow::Result`; the variants here are
//! what the engine and the matchers attach so a failure can be classified
//! after the fact with [`classify`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse category of a failure, used for uniform reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    EnvironmentSkip,
    Setup,
    AssertionTimeout,
    AssertionFailed,
    Identity,
    Cancelled,
    Config,
    Transport,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::EnvironmentSkip => "environment_skip",
            ErrorCategory::Setup => "setup",
            ErrorCategory::AssertionTimeout => "assertion_timeout",
            ErrorCategory::AssertionFailed => "assertion_failed",
            ErrorCategory::Identity => "identity",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Config => "config",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Why a bearer token was not accepted.
///
/// Every variant is a hard failure; callers match on the variant to report
/// exactly what was wrong with the token.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityFailure {
    /// Not a decodable JWT, unsupported algorithm, or missing required claims.
    #[error("malformed token: {reason}")]
    Malformed { reason: String },

    #[error("signature invalid: {reason}")]
    SignatureInvalid { reason: String },

    /// The issuer's signing keys could not be fetched.
    #[error("signing keys unavailable: {reason}")]
    KeysUnavailable { reason: String },

    #[error("issuer mismatch: expected {expected:?}, got {actual:?}")]
    IssuerMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("audience mismatch: expected {expected:?}, got {actual:?}")]
    AudienceMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("subject mismatch: expected {expected:?}, got {actual:?}")]
    SubjectMismatch {
        expected: String,
        actual: Option<String>,
    },

    /// The expected principal could not be resolved to a subject.
    #[error("expected subject could not be resolved: {reason}")]
    SubjectUnresolved { reason: String },

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    /// The request carried no bearer token at all.
    #[error("no bearer token presented")]
    MissingToken,
}

impl IdentityFailure {
    /// Stable short label, handy for log fields and test diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            IdentityFailure::Malformed { .. } => "malformed",
            IdentityFailure::SignatureInvalid { .. } => "signature_invalid",
            IdentityFailure::KeysUnavailable { .. } => "keys_unavailable",
            IdentityFailure::IssuerMismatch { .. } => "issuer_mismatch",
            IdentityFailure::AudienceMismatch { .. } => "audience_mismatch",
            IdentityFailure::SubjectMismatch { .. } => "subject_mismatch",
            IdentityFailure::SubjectUnresolved { .. } => "subject_unresolved",
            IdentityFailure::Expired => "expired",
            IdentityFailure::NotYetValid => "not_yet_valid",
            IdentityFailure::MissingToken => "missing_token",
        }
    }

    /// Failures caused by the environment rather than the token. The same
    /// token may verify once keys or the principal become available.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IdentityFailure::KeysUnavailable { .. } | IdentityFailure::SubjectUnresolved { .. }
        )
    }
}

/// Why a wait was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Someone called cancel.
    Requested,
    /// The test-level deadline passed.
    DeadlineExceeded,
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Requested => "cancel requested",
            CancelReason::DeadlineExceeded => "deadline exceeded",
            CancelReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SinkproofError {
    /// A prerequisite is unmet; the feature does not apply here.
    #[error("prerequisite {prerequisite:?} not satisfied: {reason}")]
    EnvironmentSkip {
        prerequisite: String,
        reason: String,
    },

    #[error("setup step {step:?} failed: {message}")]
    SetupFailure { step: String, message: String },

    /// The predicate never held within the deadline.
    #[error("{assertion} not satisfied within {timeout_ms}ms: {last_observed}")]
    AssertionTimeout {
        assertion: String,
        timeout_ms: u64,
        /// Summary of the last snapshot evaluated.
        last_observed: String,
    },

    /// The predicate reached a state it can never recover from.
    #[error("{assertion} failed: {last_observed}")]
    AssertionFailed {
        assertion: String,
        last_observed: String,
    },

    #[error(transparent)]
    IdentityValidationFailure(#[from] IdentityFailure),

    #[error("cancelled during {during}: {reason}")]
    Cancelled { during: String, reason: CancelReason },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl SinkproofError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SinkproofError::EnvironmentSkip { .. } => ErrorCategory::EnvironmentSkip,
            SinkproofError::SetupFailure { .. } => ErrorCategory::Setup,
            SinkproofError::AssertionTimeout { .. } => ErrorCategory::AssertionTimeout,
            SinkproofError::AssertionFailed { .. } => ErrorCategory::AssertionFailed,
            SinkproofError::IdentityValidationFailure(_) => ErrorCategory::Identity,
            SinkproofError::Cancelled { .. } => ErrorCategory::Cancelled,
            SinkproofError::Config(_) => ErrorCategory::Config,
            SinkproofError::Transport(_) => ErrorCategory::Transport,
        }
    }

    pub fn cancelled(during: impl Into<String>, reason: CancelReason) -> Self {
        SinkproofError::Cancelled {
            during: during.into(),
            reason,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SinkproofError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, SinkproofError>;

/// Category of the first typed error found in `err`'s chain.
pub fn classify(err: &anyhow::Error) -> ErrorCategory {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<SinkproofError>() {
            return e.category();
        }
        if cause.downcast_ref::<IdentityFailure>().is_some() {
            return ErrorCategory::Identity;
        }
    }
    ErrorCategory::Unknown
}

/// The identity failure carried in `err`'s chain, if any.
pub fn identity_failure(err: &anyhow::Error) -> Option<&IdentityFailure> {
    err.chain().find_map(|cause| {
        cause.downcast_ref::<IdentityFailure>().or_else(|| {
            match cause.downcast_ref::<SinkproofError>() {
                Some(SinkproofError::IdentityValidationFailure(f)) => Some(f),
                _ => None,
            }
        })
    })
}
