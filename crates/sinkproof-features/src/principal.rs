use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sinkproof_ports::{PrincipalResolver, ResourceInstaller};
use sinkproof_schema::TestScope;
use sinkproof_schema::resource::{Gvr, PrincipalRef, service_account_subject};
use std::sync::Arc;

/// Resolves a principal to the service account its resource reports in status.
///
/// The principal's kind is matched against the plural resource name of the
/// registered resource types.
pub struct ResourcePrincipalResolver {
    installer: Arc<dyn ResourceInstaller>,
    kinds: Vec<Gvr>,
}

impl ResourcePrincipalResolver {
    pub fn new(installer: Arc<dyn ResourceInstaller>) -> Self {
        Self {
            installer,
            kinds: Vec::new(),
        }
    }

    pub fn with_kind(mut self, gvr: Gvr) -> Self {
        self.kinds.push(gvr);
        self
    }

    fn gvr_for(&self, kind: &str) -> Option<&Gvr> {
        self.kinds
            .iter()
            .find(|gvr| gvr.resource.eq_ignore_ascii_case(kind))
    }
}

impl std::fmt::Debug for ResourcePrincipalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePrincipalResolver")
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PrincipalResolver for ResourcePrincipalResolver {
    async fn resolve_subject(&self, scope: &TestScope, principal: &PrincipalRef) -> Result<String> {
        let gvr = self
            .gvr_for(&principal.kind)
            .ok_or_else(|| anyhow!("no resource type registered for kind {}", principal.kind))?;
        let status = self
            .installer
            .status(scope, gvr, &principal.name)
            .await
            .with_context(|| format!("status of {gvr} {}", principal.name))?;
        let service_account = status.service_account_name.ok_or_else(|| {
            anyhow!("{gvr} {} reports no OIDC service account", principal.name)
        })?;
        Ok(service_account_subject(&principal.namespace, &service_account))
    }
}
