//! Suite runner: per-feature namespaces, context failures, exit policy, cancellation.

use anyhow::anyhow;
use sinkproof_cancel::{CancelReason, CancelSignal};
use sinkproof_engine::{
    Collaborators, Engine, ExitPolicy, Feature, FeatureContext, StepStatus, Suite, action,
};
use sinkproof_identity::StaticKeySource;
use sinkproof_ports::FeatureFlags;
use sinkproof_receiver::LocalTransport;
use sinkproof_schema::TestScope;
use sinkproof_testkit::{InMemoryInstaller, StaticPrincipalResolver, TestIssuer};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn context(scope: TestScope) -> FeatureContext {
    let issuer = Arc::new(TestIssuer::new("https://issuer.example"));
    FeatureContext::new(
        scope,
        Collaborators {
            installer: Arc::new(InMemoryInstaller::new(issuer.clone())),
            transport: Arc::new(LocalTransport::new()),
            keys: Arc::new(StaticKeySource::new(issuer.jwks())),
            principals: Arc::new(StaticPrincipalResolver::new()),
            flags: Arc::new(FeatureFlags::default()),
        },
    )
}

fn recording(name: &str, namespaces: Arc<Mutex<Vec<String>>>) -> Feature {
    Feature::new(name).setup(
        "record namespace",
        action(move |ctx| {
            let namespaces = namespaces.clone();
            Box::pin(async move {
                namespaces.lock().unwrap().push(ctx.scope.namespace.clone());
                Ok(())
            })
        }),
    )
}

#[tokio::test]
async fn features_get_distinct_namespaces() {
    let namespaces = Arc::new(Mutex::new(Vec::new()));
    let features: Vec<Feature> = (0..5)
        .map(|i| recording(&format!("f{i}"), namespaces.clone()))
        .collect();

    let suite = Suite::new(Engine::default()).with_namespace_prefix("suite-test");
    let result = suite.run_all(&features, |_, scope| Ok(context(scope))).await;

    assert_eq!(result.passed(), 5);
    assert!(result.is_success());
    let names: Vec<&str> = result.features.iter().map(|f| f.feature.as_str()).collect();
    assert_eq!(names, ["f0", "f1", "f2", "f3", "f4"]);
    let seen = namespaces.lock().unwrap().clone();
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 5);
    assert!(seen.iter().all(|ns| ns.starts_with("suite-test-")));
}

#[tokio::test]
async fn context_failure_fails_only_that_feature() {
    let namespaces = Arc::new(Mutex::new(Vec::new()));
    let features = vec![
        recording("good", namespaces.clone()),
        recording("bad", namespaces.clone()),
    ];

    let result = Suite::new(Engine::default())
        .run_all(&features, |feature, scope| {
            if feature.name() == "bad" {
                Err(anyhow!("no cluster access"))
            } else {
                Ok(context(scope))
            }
        })
        .await;

    assert_eq!(result.passed(), 1);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.exit_code(), 1);
    let bad = &result.features[1];
    assert_eq!(bad.steps[0].status, StepStatus::Failed);
    assert_eq!(bad.steps[0].message.as_deref(), Some("no cluster access"));
}

#[tokio::test]
async fn failed_should_only_matters_under_strict_policy() {
    let features = vec![Feature::new("soft").stable("g", |g| {
        g.should(
            "optional",
            action(|_| Box::pin(async { Err(anyhow!("not there")) })),
        )
    })];

    let lenient = Suite::new(Engine::default())
        .run_all(&features, |_, scope| Ok(context(scope)))
        .await;
    assert_eq!(lenient.policy, ExitPolicy::Lenient);
    assert!(lenient.is_success());

    let strict = Suite::new(Engine::default())
        .with_policy(ExitPolicy::Strict)
        .run_all(&features, |_, scope| Ok(context(scope)))
        .await;
    assert!(!strict.is_success());
}

#[tokio::test]
async fn suite_cancel_reaches_every_feature() {
    let hang = || {
        Feature::new("hang").setup(
            "wait",
            action(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
            }),
        )
    };
    let features = vec![hang(), hang(), hang()];
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel(CancelReason::Shutdown);
    });

    let started = std::time::Instant::now();
    let result = Suite::new(Engine::default())
        .with_concurrency(3)
        .with_cancel(cancel)
        .run_all(&features, |_, scope| Ok(context(scope)))
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.failed(), 3);
}
