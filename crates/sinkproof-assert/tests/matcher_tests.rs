//! Matchers against a real store, including identity checks with minted tokens.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use proptest::prelude::*;
use sinkproof_assert::{
    ContextPredicate, ContextVerdict, MatchContext, PollConfig, Threshold, has_type, kind,
    on_store, oidc_user_from_resource,
};
use sinkproof_cancel::{CancelReason, CancelSignal};
use sinkproof_error::{ErrorCategory, SinkproofError};
use sinkproof_identity::{StaticKeySource, Verifier, VerifierConfig};
use sinkproof_ports::KeySource;
use sinkproof_schema::event::{CapturedEvent, EventKind};
use sinkproof_schema::resource::{Gvr, PrincipalRef, ReceiverOptions};
use sinkproof_store::EventStore;
use sinkproof_testkit::proptest::strategy_interleaving;
use sinkproof_testkit::{StaticPrincipalResolver, TestIssuer, test_scope};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TIMER: &str = "dev.knative.eventing.timer";
const ISSUER: &str = "https://issuer.example";
const SUBJECT: &str = "system:serviceaccount:test-ns:src-oidc-sources.knative.dev-integrationsources";

fn gvr() -> Gvr {
    Gvr::new("sources.knative.dev", "v1alpha1", "integrationsources")
}

fn event(event_type: &str) -> CapturedEvent {
    CapturedEvent::new("sink", EventKind::EventReceived).with_type(event_type)
}

fn once() -> PollConfig {
    PollConfig {
        interval_ms: 10,
        timeout_ms: 0,
    }
}

fn context(store: &EventStore) -> MatchContext {
    MatchContext::new(test_scope(), store.clone())
}

fn identity_context(store: &EventStore, issuer: &TestIssuer) -> MatchContext {
    let resolver = StaticPrincipalResolver::new().with(
        PrincipalRef::new("integrationsources", "test-ns", "src"),
        SUBJECT,
    );
    let verifier = Verifier::new(
        VerifierConfig::default().with_issuer(ISSUER),
        Arc::new(StaticKeySource::new(issuer.jwks())),
    )
    .with_resolver(Arc::new(resolver));
    context(store).with_verifier(Arc::new(verifier))
}

proptest! {
    #[test]
    fn at_least_depends_only_on_match_count(
        flags in strategy_interleaving(0..6, 8),
        n in 0usize..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = EventStore::new();
        for matching in &flags {
            store.append("sink", event(if *matching { TIMER } else { "other" }));
        }
        let k = flags.iter().filter(|f| **f).count();

        let assertion = on_store("sink").match_event(has_type(TIMER)).at_least(n);
        let result = runtime.block_on(assertion.check(&context(&store), &once(), &CancelSignal::new()));
        prop_assert_eq!(result.is_err(), k < n);
        if let Ok(observation) = result {
            prop_assert_eq!(observation.matched, k);
            prop_assert_eq!(observation.total, flags.len());
        }
    }
}

#[tokio::test]
async fn at_least_waits_for_late_events() {
    let store = EventStore::new();
    let writer = store.clone();
    tokio::spawn(async move {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append("sink", event(TIMER));
        }
    });

    let config = PollConfig::new(Duration::from_millis(50), Duration::from_secs(10));
    let observation = on_store("sink")
        .match_event(has_type(TIMER))
        .at_least(3)
        .check(&context(&store), &config, &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(observation.matched, 3);
}

#[tokio::test]
async fn timeout_reports_last_observation() {
    let store = EventStore::new();
    store.append("sink", event("other"));
    let config = PollConfig::new(Duration::from_millis(10), Duration::from_millis(50));

    let err = on_store("sink")
        .match_event(has_type(TIMER))
        .at_least(1)
        .check(&context(&store), &config, &CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AssertionTimeout);
    let message = err.to_string();
    assert!(message.contains("at least 1 events on sink"), "{message}");
    assert!(message.contains("0 of 1 events matched"), "{message}");
    assert!(message.contains("type=other"), "{message}");
}

#[tokio::test]
async fn exactly_fails_once_exceeded() {
    let store = EventStore::new();
    for _ in 0..3 {
        store.append("sink", event(TIMER));
    }
    let config = PollConfig::new(Duration::from_millis(10), Duration::from_secs(10));
    let ctx = context(&store);
    let cancel = CancelSignal::new();

    let exact = on_store("sink").match_event(has_type(TIMER));
    assert!(exact.clone().exactly(3).check(&ctx, &config, &cancel).await.is_ok());
    let err = exact.exactly(2).check(&ctx, &config, &cancel).await.unwrap_err();
    assert!(matches!(err, SinkproofError::AssertionFailed { .. }), "{err}");
}

#[tokio::test]
async fn none_is_checked_once() {
    let store = EventStore::new();
    store.append("sink", event("other"));
    let ctx = context(&store);
    let config = PollConfig::default();
    let cancel = CancelSignal::new();

    let none = on_store("sink").match_event(has_type(TIMER)).none();
    assert_eq!(none.threshold(), Threshold::None);
    assert!(none.check(&ctx, &config, &cancel).await.is_ok());

    store.append("sink", event(TIMER));
    let err = none.check(&ctx, &config, &cancel).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AssertionFailed);
}

#[tokio::test]
async fn cancelled_check_returns_cancelled() {
    let store = EventStore::new();
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel(CancelReason::Requested);
    });

    let err = on_store("sink")
        .match_event(has_type(TIMER))
        .at_least(1)
        .check(&context(&store), &PollConfig::default(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn identity_of_source_is_verified() {
    let issuer = TestIssuer::new(ISSUER);
    let store = EventStore::new();
    store.register("sink", ReceiverOptions::default().with_audience("audience"));
    store.append("sink", event(TIMER).with_bearer_token(issuer.token("audience", SUBJECT)));

    let observation = on_store("sink")
        .match_with_context(has_type(TIMER), oidc_user_from_resource(&gvr(), "src"))
        .at_least(1)
        .check(&identity_context(&store, &issuer), &once(), &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(observation.matched, 1);
    assert!(observation.recent[0].ends_with("[valid]"));
}

#[tokio::test]
async fn wrong_audience_fails_identity_but_not_type() {
    let issuer = TestIssuer::new(ISSUER);
    let store = EventStore::new();
    store.register("sink", ReceiverOptions::default().with_audience("audience"));
    store.append("sink", event(TIMER).with_bearer_token(issuer.token("wrong", SUBJECT)));
    let ctx = identity_context(&store, &issuer);
    let cancel = CancelSignal::new();

    assert!(
        on_store("sink")
            .match_event(has_type(TIMER))
            .at_least(1)
            .check(&ctx, &once(), &cancel)
            .await
            .is_ok()
    );
    let err = on_store("sink")
        .match_with_context(has_type(TIMER), oidc_user_from_resource(&gvr(), "src"))
        .at_least(1)
        .check(&ctx, &once(), &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("[audience_mismatch]"), "{err}");
}

#[tokio::test]
async fn missing_token_and_other_principal_do_not_match() {
    let issuer = TestIssuer::new(ISSUER);
    let store = EventStore::new();
    store.register("sink", ReceiverOptions::default().with_audience("audience"));
    store.append("sink", event(TIMER));
    store.append(
        "sink",
        event(TIMER).with_bearer_token(issuer.token("audience", "system:serviceaccount:test-ns:other")),
    );

    let err = on_store("sink")
        .match_with_context(has_type(TIMER), oidc_user_from_resource(&gvr(), "src"))
        .at_least(1)
        .check(&identity_context(&store, &issuer), &once(), &CancelSignal::new())
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("[missing_token]"), "{message}");
    assert!(message.contains("[subject_mismatch]"), "{message}");
}

struct Counting(Arc<AtomicUsize>);

#[async_trait]
impl ContextPredicate for Counting {
    async fn evaluate(&self, _ctx: &MatchContext, _event: &CapturedEvent) -> ContextVerdict {
        self.0.fetch_add(1, Ordering::SeqCst);
        ContextVerdict::unmatched("counted")
    }

    fn describe(&self) -> String {
        "counting".into()
    }
}

#[tokio::test]
async fn context_verdicts_are_memoized_per_event() {
    let store = EventStore::new();
    store.append("sink", event(TIMER));
    store.append("sink", event("other"));
    store.append("sink", event(TIMER));
    let calls = Arc::new(AtomicUsize::new(0));
    let config = PollConfig::new(Duration::from_millis(5), Duration::from_millis(100));

    let err = on_store("sink")
        .match_with_context(has_type(TIMER), Counting(calls.clone()))
        .at_least(1)
        .check(&context(&store), &config, &CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AssertionTimeout);
    // Many attempts, but each matching event is evaluated once.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Fails its first fetch, then serves the issuer's keys.
struct FlakyKeys {
    fetches: AtomicUsize,
    jwks: JwkSet,
}

#[async_trait]
impl KeySource for FlakyKeys {
    async fn fetch_keys(&self) -> anyhow::Result<JwkSet> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("issuer unreachable");
        }
        Ok(self.jwks.clone())
    }
}

#[tokio::test]
async fn identity_recovers_once_keys_become_available() {
    let issuer = TestIssuer::new(ISSUER);
    let store = EventStore::new();
    store.register("sink", ReceiverOptions::default().with_audience("audience"));
    store.append("sink", event(TIMER).with_bearer_token(issuer.token("audience", SUBJECT)));

    let keys = Arc::new(FlakyKeys {
        fetches: AtomicUsize::new(0),
        jwks: issuer.jwks(),
    });
    let resolver = StaticPrincipalResolver::new().with(
        PrincipalRef::new("integrationsources", "test-ns", "src"),
        SUBJECT,
    );
    let verifier = Verifier::new(VerifierConfig::default().with_issuer(ISSUER), keys.clone())
        .with_resolver(Arc::new(resolver));
    let ctx = context(&store).with_verifier(Arc::new(verifier));
    let config = PollConfig::new(Duration::from_millis(20), Duration::from_secs(2));

    let observation = on_store("sink")
        .match_with_context(kind(EventKind::EventReceived), oidc_user_from_resource(&gvr(), "src"))
        .at_least(1)
        .check(&ctx, &config, &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(observation.matched, 1);
    assert!(keys.fetches.load(Ordering::SeqCst) >= 2);
}

