//! Running one feature.

use crate::context::FeatureContext;
use crate::feature::{Feature, PrerequisiteResult, Step, StepKind};
use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sinkproof_cancel::CancelSignal;
use sinkproof_error::{SinkproofError, classify};
use sinkproof_schema::feature::{
    FeatureResult, FeatureStatus, Grade, Maturity, Phase, StepRecord, StepStatus,
};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Which assertions run and how long a feature may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Assertions with other grades are recorded as skipped.
    #[serde(default = "all_grades")]
    pub grades: BTreeSet<Grade>,
    /// Assertions with other maturities are recorded as skipped.
    #[serde(default = "all_maturities")]
    pub maturities: BTreeSet<Maturity>,
    /// Deadline for the whole feature, teardown excluded.
    #[serde(default)]
    pub feature_timeout_ms: Option<u64>,
    /// Budget for each teardown step.
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

fn all_grades() -> BTreeSet<Grade> {
    Grade::ALL.into_iter().collect()
}

fn all_maturities() -> BTreeSet<Maturity> {
    Maturity::ALL.into_iter().collect()
}

fn default_teardown_timeout_ms() -> u64 {
    30_000
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            grades: all_grades(),
            maturities: all_maturities(),
            feature_timeout_ms: None,
            teardown_timeout_ms: default_teardown_timeout_ms(),
        }
    }
}

impl RunOptions {
    pub fn with_grades(mut self, grades: impl IntoIterator<Item = Grade>) -> Self {
        self.grades = grades.into_iter().collect();
        self
    }

    pub fn with_maturities(mut self, maturities: impl IntoIterator<Item = Maturity>) -> Self {
        self.maturities = maturities.into_iter().collect();
        self
    }

    pub fn with_feature_timeout(mut self, timeout: Duration) -> Self {
        self.feature_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    fn selects(&self, grade: Grade, maturity: Maturity) -> bool {
        self.grades.contains(&grade) && self.maturities.contains(&maturity)
    }
}

/// Runs features step by step and grades the outcome.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    options: RunOptions,
}

enum Outcome<T> {
    Done(T),
    Failed(String),
}

impl Engine {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs `feature` in `ctx`.
    ///
    /// An unmet prerequisite skips everything else. A failing setup or
    /// requirement step aborts the remaining non-teardown steps. Every
    /// selected assertion runs, and the feature fails iff a `Must` failed,
    /// a step before the assertions failed, or the run was cancelled.
    pub async fn run(&self, feature: &Feature, ctx: &FeatureContext) -> FeatureResult {
        let span = tracing::info_span!(
            "feature",
            feature = feature.name(),
            namespace = %ctx.scope.namespace
        );
        self.run_inner(feature, ctx).instrument(span).await
    }

    async fn run_inner(&self, feature: &Feature, ctx: &FeatureContext) -> FeatureResult {
        let started_at = Utc::now();
        let ctx = match self.options.feature_timeout_ms {
            Some(ms) => ctx
                .clone()
                .with_cancel(ctx.cancel.with_deadline(Duration::from_millis(ms))),
            None => ctx.clone(),
        };
        tracing::info!("feature started");

        let mut records = Vec::with_capacity(feature.steps().len());
        let mut status = FeatureStatus::Passed;
        let mut aborted = false;
        let mut setup_started = false;

        for step in feature.steps_in(Phase::Prerequisite) {
            if aborted || matches!(status, FeatureStatus::Skipped { .. }) {
                records.push(record(step, StepStatus::NotRun, None, Duration::ZERO));
                continue;
            }
            let StepKind::Prerequisite(check) = &step.kind else {
                continue;
            };
            let started = Instant::now();
            match execute(&ctx.cancel, check.evaluate(&ctx)).await {
                Outcome::Done(PrerequisiteResult {
                    satisfied: true, ..
                }) => {
                    records.push(record(step, StepStatus::Passed, None, started.elapsed()));
                }
                Outcome::Done(PrerequisiteResult { reason, .. }) => {
                    tracing::info!(step = %step.name, %reason, "prerequisite not met, skipping feature");
                    records.push(record(
                        step,
                        StepStatus::Skipped,
                        Some(reason.clone()),
                        started.elapsed(),
                    ));
                    status = FeatureStatus::Skipped {
                        prerequisite: step.name.clone(),
                        reason,
                    };
                }
                Outcome::Failed(message) => {
                    tracing::warn!(step = %step.name, error = %message, "prerequisite could not be evaluated");
                    records.push(record(
                        step,
                        StepStatus::Failed,
                        Some(message),
                        started.elapsed(),
                    ));
                    aborted = true;
                }
            }
        }
        let skipped = matches!(status, FeatureStatus::Skipped { .. });

        for phase in [Phase::Setup, Phase::Requirement] {
            for step in feature.steps_in(phase) {
                if aborted || skipped {
                    records.push(record(step, StepStatus::NotRun, None, Duration::ZERO));
                    continue;
                }
                setup_started = true;
                let rec = self.run_action(step, &ctx, &ctx.cancel).await;
                if rec.status == StepStatus::Failed {
                    aborted = true;
                }
                records.push(rec);
            }
        }

        for step in feature.steps_in(Phase::Assert) {
            if aborted || skipped {
                records.push(record(step, StepStatus::NotRun, None, Duration::ZERO));
                continue;
            }
            if let Some(meta) = &step.assert
                && !self.options.selects(meta.grade, meta.maturity)
            {
                records.push(record(
                    step,
                    StepStatus::Skipped,
                    Some("deselected by run options".into()),
                    Duration::ZERO,
                ));
                continue;
            }
            records.push(self.run_action(step, &ctx, &ctx.cancel).await);
        }

        let cancelled = ctx.cancel.reason();

        // Teardown gets its own signal: the feature's may already have fired.
        for step in feature.steps_in(Phase::Teardown) {
            if !setup_started {
                records.push(record(step, StepStatus::NotRun, None, Duration::ZERO));
                continue;
            }
            let cancel =
                CancelSignal::new().with_deadline(Duration::from_millis(self.options.teardown_timeout_ms));
            let teardown_ctx = ctx.clone().with_cancel(cancel.clone());
            records.push(self.run_action(step, &teardown_ctx, &cancel).await);
        }

        if !skipped
            && (aborted
                || cancelled.is_some()
                || records.iter().any(StepRecord::is_failed_must))
        {
            status = FeatureStatus::Failed;
        }

        let result = FeatureResult {
            feature: feature.name().to_string(),
            status,
            steps: records,
            started_at,
            finished_at: Utc::now(),
        };
        log_result(&result);
        result
    }

    async fn run_action(&self, step: &Step, ctx: &FeatureContext, cancel: &CancelSignal) -> StepRecord {
        let StepKind::Action(action) = &step.kind else {
            return record(step, StepStatus::NotRun, None, Duration::ZERO);
        };
        let span = tracing::info_span!("step", step = %step.name, phase = %step.phase);
        let started = Instant::now();
        let outcome = execute(cancel, action.run(ctx)).instrument(span).await;
        let elapsed = started.elapsed();
        match outcome {
            Outcome::Done(()) => {
                let elapsed_ms = elapsed.as_millis() as u64;
                tracing::debug!(step = %step.name, phase = %step.phase, elapsed_ms, "step passed");
                record(step, StepStatus::Passed, None, elapsed)
            }
            Outcome::Failed(message) => {
                match &step.assert {
                    Some(meta) if meta.grade != Grade::Must => tracing::info!(
                        step = %step.name,
                        grade = %meta.grade,
                        error = %message,
                        "non-fatal assertion failed"
                    ),
                    _ => tracing::warn!(step = %step.name, phase = %step.phase, error = %message, "step failed"),
                }
                record(step, StepStatus::Failed, Some(message), elapsed)
            }
        }
    }
}

/// Runs `fut` under `cancel`, turning errors, cancellation and panics into a message.
async fn execute<T, F>(cancel: &CancelSignal, fut: F) -> Outcome<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match cancel
        .run_until_cancelled(AssertUnwindSafe(fut).catch_unwind())
        .await
    {
        Ok(Ok(Ok(value))) => Outcome::Done(value),
        Ok(Ok(Err(e))) => {
            tracing::trace!(category = %classify(&e), "step error");
            Outcome::Failed(format!("{e:#}"))
        }
        Ok(Err(panic)) => Outcome::Failed(format!("step panicked: {}", panic_message(&panic))),
        Err(reason) => Outcome::Failed(SinkproofError::cancelled("step", reason).to_string()),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn record(step: &Step, status: StepStatus, message: Option<String>, elapsed: Duration) -> StepRecord {
    StepRecord {
        grade: step.assert.as_ref().map(|m| m.grade),
        maturity: step.assert.as_ref().map(|m| m.maturity),
        group: step.assert.as_ref().map(|m| m.group.clone()),
        message,
        duration_ms: elapsed.as_millis() as u64,
        ..StepRecord::new(step.name.clone(), step.phase, status)
    }
}

fn log_result(result: &FeatureResult) {
    match &result.status {
        FeatureStatus::Passed => tracing::info!(
            failed_shoulds = result.failed_shoulds().len(),
            "feature passed"
        ),
        FeatureStatus::Failed => tracing::warn!(
            failed_musts = result.failed_musts().len(),
            first = result.first_must_failure().map(|s| s.name.as_str()),
            "feature failed"
        ),
        FeatureStatus::Skipped {
            prerequisite,
            reason,
        } => tracing::info!(%prerequisite, %reason, "feature skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_select_everything() {
        let options = RunOptions::default();
        for grade in Grade::ALL {
            for maturity in Maturity::ALL {
                assert!(options.selects(grade, maturity));
            }
        }
        let narrowed = options.with_grades([Grade::Must]).with_maturities([Maturity::Stable]);
        assert!(narrowed.selects(Grade::Must, Maturity::Stable));
        assert!(!narrowed.selects(Grade::Should, Maturity::Stable));
        assert!(!narrowed.selects(Grade::Must, Maturity::Alpha));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: RunOptions = serde_json::from_str(r#"{"grades":["must"]}"#).unwrap();
        assert_eq!(options.grades.len(), 1);
        assert_eq!(options.maturities.len(), 3);
        assert_eq!(options.teardown_timeout_ms, 30_000);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let p: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&p), "boom");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&p), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(&p), "non-string panic payload");
    }
}
