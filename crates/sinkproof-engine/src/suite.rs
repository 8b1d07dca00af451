//! Running many independent features, each in its own namespace.

use crate::context::FeatureContext;
use crate::feature::Feature;
use crate::run::Engine;
use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sinkproof_cancel::CancelSignal;
use sinkproof_schema::TestScope;
use sinkproof_schema::feature::{FeatureResult, FeatureStatus, Phase, StepRecord, StepStatus};

/// How a suite's results map onto success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    /// Only failed features fail the suite.
    #[default]
    Lenient,
    /// Failed `Should` assertions fail the suite too.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub policy: ExitPolicy,
    /// In the order the features were given.
    pub features: Vec<FeatureResult>,
}

impl SuiteResult {
    pub fn passed(&self) -> usize {
        self.features.iter().filter(|f| f.is_passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.features.iter().filter(|f| f.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.features.iter().filter(|f| f.is_skipped()).count()
    }

    pub fn is_success(&self) -> bool {
        match self.policy {
            ExitPolicy::Lenient => self.failed() == 0,
            ExitPolicy::Strict => self
                .features
                .iter()
                .all(|f| !f.is_failed() && f.failed_shoulds().is_empty()),
        }
    }

    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Runs features concurrently, each against a context built for its own scope.
#[derive(Debug, Clone)]
pub struct Suite {
    engine: Engine,
    policy: ExitPolicy,
    concurrency: usize,
    cancel: CancelSignal,
    namespace_prefix: String,
}

impl Suite {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            policy: ExitPolicy::default(),
            concurrency: 4,
            cancel: CancelSignal::new(),
            namespace_prefix: "sinkproof".into(),
        }
    }

    pub fn with_policy(mut self, policy: ExitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// At most `n` features in flight; at least one.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Cancelling `cancel` cancels every feature of the suite.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_namespace_prefix(mut self, prefix: &str) -> Self {
        self.namespace_prefix = prefix.to_string();
        self
    }

    /// Runs every feature with a context from `make_context`.
    ///
    /// Each feature gets a fresh random namespace and a child of the suite's
    /// cancel signal. A context that cannot be built fails its feature
    /// without affecting the others.
    pub async fn run_all<F>(&self, features: &[Feature], make_context: F) -> SuiteResult
    where
        F: Fn(&Feature, TestScope) -> Result<FeatureContext>,
    {
        let runs = features.iter().map(|feature| {
            let scope = TestScope::random(&self.namespace_prefix);
            let ctx = make_context(feature, scope);
            async move {
                match ctx {
                    Ok(ctx) => {
                        let ctx = ctx.with_cancel(self.cancel.child());
                        self.engine.run(feature, &ctx).await
                    }
                    Err(e) => context_failure(feature, &e),
                }
            }
        });
        let results: Vec<FeatureResult> = futures::stream::iter(runs)
            .buffered(self.concurrency)
            .collect()
            .await;

        let suite = SuiteResult {
            policy: self.policy,
            features: results,
        };
        tracing::info!(
            passed = suite.passed(),
            failed = suite.failed(),
            skipped = suite.skipped(),
            success = suite.is_success(),
            "suite finished"
        );
        suite
    }
}

fn context_failure(feature: &Feature, error: &anyhow::Error) -> FeatureResult {
    tracing::warn!(feature = feature.name(), error = %format!("{error:#}"), "could not build feature context");
    let now = Utc::now();
    FeatureResult {
        feature: feature.name().to_string(),
        status: FeatureStatus::Failed,
        steps: vec![StepRecord {
            message: Some(format!("{error:#}")),
            ..StepRecord::new("build context", Phase::Setup, StepStatus::Failed)
        }],
        started_at: now,
        finished_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinkproof_schema::feature::Grade;

    fn result(status: FeatureStatus, failed_should: bool) -> FeatureResult {
        let mut steps = Vec::new();
        if failed_should {
            steps.push(StepRecord {
                grade: Some(Grade::Should),
                ..StepRecord::new("s", Phase::Assert, StepStatus::Failed)
            });
        }
        FeatureResult {
            feature: "f".into(),
            status,
            steps,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn lenient_ignores_should_failures_and_skips() {
        let suite = SuiteResult {
            policy: ExitPolicy::Lenient,
            features: vec![
                result(FeatureStatus::Passed, true),
                result(
                    FeatureStatus::Skipped {
                        prerequisite: "p".into(),
                        reason: "r".into(),
                    },
                    false,
                ),
            ],
        };
        assert!(suite.is_success());
        assert_eq!(suite.exit_code(), 0);
        assert_eq!((suite.passed(), suite.skipped(), suite.failed()), (1, 1, 0));
    }

    #[test]
    fn strict_fails_on_should_failures() {
        let suite = SuiteResult {
            policy: ExitPolicy::Strict,
            features: vec![result(FeatureStatus::Passed, true)],
        };
        assert!(!suite.is_success());
        assert_eq!(suite.exit_code(), 1);
    }

    #[test]
    fn any_failed_feature_fails_both_policies() {
        for policy in [ExitPolicy::Lenient, ExitPolicy::Strict] {
            let suite = SuiteResult {
                policy,
                features: vec![result(FeatureStatus::Failed, false)],
            };
            assert!(!suite.is_success());
        }
    }
}
