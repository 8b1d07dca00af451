//! Fixtures shared by sinkproof's tests.
//!
//! Keeping these in one workspace-only crate avoids copy-paste across the
//! identity, assert, engine and feature tests.

pub mod installer;
pub mod issuer;
pub mod proptest;

pub use installer::{InMemoryInstaller, TIMER_EVENT_TYPE};
pub use issuer::{TestIssuer, TokenSpec};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sinkproof_ids::RunId;
use sinkproof_ports::PrincipalResolver;
use sinkproof_schema::TestScope;
use sinkproof_schema::resource::PrincipalRef;
use std::collections::HashMap;

/// Scope with the fixed namespace `test-ns`.
pub fn test_scope() -> TestScope {
    TestScope::new("test-ns", RunId("test-run".into()))
}

/// Resolves principals from a fixed table; unknown principals are an error.
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipalResolver {
    subjects: HashMap<PrincipalRef, String>,
}

impl StaticPrincipalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, principal: PrincipalRef, subject: &str) -> Self {
        self.subjects.insert(principal, subject.to_string());
        self
    }
}

#[async_trait]
impl PrincipalResolver for StaticPrincipalResolver {
    async fn resolve_subject(&self, _scope: &TestScope, principal: &PrincipalRef) -> Result<String> {
        self.subjects
            .get(principal)
            .cloned()
            .ok_or_else(|| anyhow!("unknown principal {}/{}", principal.kind, principal.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_knows_only_its_table() {
        let p = PrincipalRef::new("integrationsources", "test-ns", "src");
        let resolver = StaticPrincipalResolver::new().with(p.clone(), "sub");
        assert_eq!(resolver.resolve_subject(&test_scope(), &p).await.unwrap(), "sub");

        let other = PrincipalRef::new("integrationsources", "test-ns", "other");
        assert!(resolver.resolve_subject(&test_scope(), &other).await.is_err());
    }
}
