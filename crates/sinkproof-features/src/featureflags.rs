//! Prerequisites on the environment's feature flags.

use anyhow::Result;
use async_trait::async_trait;
use sinkproof_engine::{FeatureContext, Prerequisite, PrerequisiteResult};
use sinkproof_ports::FeatureFlags;

/// One flag requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagCheck {
    AuthenticationOidcEnabled,
    TransportEncryptionStrict,
    IstioDisabled,
}

impl FlagCheck {
    fn check(self, flags: &FeatureFlags) -> PrerequisiteResult {
        match self {
            FlagCheck::AuthenticationOidcEnabled if flags.is_oidc_enabled() => {
                PrerequisiteResult::satisfied()
            }
            FlagCheck::AuthenticationOidcEnabled => {
                PrerequisiteResult::unsatisfied("authentication-oidc feature is disabled")
            }
            FlagCheck::TransportEncryptionStrict if flags.is_transport_encryption_strict() => {
                PrerequisiteResult::satisfied()
            }
            FlagCheck::TransportEncryptionStrict => PrerequisiteResult::unsatisfied(format!(
                "transport-encryption is {:?}, not strict",
                flags.transport_encryption
            )),
            FlagCheck::IstioDisabled if flags.is_istio_enabled() => {
                PrerequisiteResult::unsatisfied("istio is enabled")
            }
            FlagCheck::IstioDisabled => PrerequisiteResult::satisfied(),
        }
    }
}

#[async_trait]
impl Prerequisite for FlagCheck {
    async fn evaluate(&self, ctx: &FeatureContext) -> Result<PrerequisiteResult> {
        let flags = ctx.flags().flags(&ctx.scope).await?;
        Ok(self.check(&flags))
    }
}

pub fn authentication_oidc_enabled() -> FlagCheck {
    FlagCheck::AuthenticationOidcEnabled
}

pub fn transport_encryption_strict() -> FlagCheck {
    FlagCheck::TransportEncryptionStrict
}

pub fn istio_disabled() -> FlagCheck {
    FlagCheck::IstioDisabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinkproof_ports::TransportEncryption;

    #[test]
    fn checks_against_flags() {
        let off = FeatureFlags::default();
        assert!(!authentication_oidc_enabled().check(&off).satisfied);
        assert!(!transport_encryption_strict().check(&off).satisfied);
        assert!(istio_disabled().check(&off).satisfied);

        let on = FeatureFlags {
            authentication_oidc: true,
            transport_encryption: TransportEncryption::Strict,
            istio_enabled: true,
        };
        assert!(authentication_oidc_enabled().check(&on).satisfied);
        assert!(transport_encryption_strict().check(&on).satisfied);
        assert_eq!(istio_disabled().check(&on).reason, "istio is enabled");
    }

    #[test]
    fn permissive_is_not_strict() {
        let flags = FeatureFlags {
            transport_encryption: TransportEncryption::Permissive,
            ..FeatureFlags::default()
        };
        let result = transport_encryption_strict().check(&flags);
        assert_eq!(result.reason, "transport-encryption is Permissive, not strict");
    }
}
