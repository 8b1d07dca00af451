//! Context predicate checking the bearer token an event arrived with.

use crate::context::MatchContext;
use crate::predicate::{ContextPredicate, ContextVerdict};
use async_trait::async_trait;
use sinkproof_schema::event::CapturedEvent;
use sinkproof_schema::resource::{Gvr, PrincipalRef};

/// The event's token must be a valid identity of resource `name` of type
/// `gvr`, issued for the audience the receiver was started with.
pub fn oidc_user_from_resource(gvr: &Gvr, name: &str) -> OidcUserFromResource {
    OidcUserFromResource {
        gvr: gvr.clone(),
        name: name.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct OidcUserFromResource {
    gvr: Gvr,
    name: String,
}

#[async_trait]
impl ContextPredicate for OidcUserFromResource {
    async fn evaluate(&self, ctx: &MatchContext, event: &CapturedEvent) -> ContextVerdict {
        let Some(token) = event.security.bearer_token.as_deref() else {
            return ContextVerdict::unmatched("missing_token");
        };
        let Some(verifier) = ctx.verifier.as_ref() else {
            return ContextVerdict::unmatched("no_verifier");
        };
        let Some(audience) = ctx
            .store
            .receiver_options(&event.receiver)
            .and_then(|o| o.audience)
        else {
            return ContextVerdict::unmatched("receiver_has_no_audience");
        };

        let principal = PrincipalRef::new(&self.gvr.resource, &ctx.scope.namespace, &self.name);
        let outcome = verifier.verify(&ctx.scope, token, &audience, &principal).await;
        match outcome.failure() {
            None => ContextVerdict::matched("valid"),
            Some(failure) => {
                tracing::debug!(
                    receiver = %event.receiver,
                    sequence = event.sequence,
                    error = %failure,
                    "identity check failed"
                );
                if failure.is_transient() {
                    ContextVerdict::retry(failure.label())
                } else {
                    ContextVerdict::unmatched(failure.label())
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("OIDC identity of {} {}", self.gvr, self.name)
    }
}
