//! Declaring features: ordered steps in phases, assertions in graded groups.

use crate::context::FeatureContext;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use sinkproof_assert::StoreAssertion;
use sinkproof_schema::feature::{Grade, Maturity, Phase};
use std::sync::Arc;

/// Outcome of a prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteResult {
    pub satisfied: bool,
    pub reason: String,
}

impl PrerequisiteResult {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            reason: String::new(),
        }
    }

    pub fn unsatisfied(reason: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            reason: reason.into(),
        }
    }
}

/// Decides whether a feature applies to the environment at all.
#[async_trait]
pub trait Prerequisite: Send + Sync {
    async fn evaluate(&self, ctx: &FeatureContext) -> Result<PrerequisiteResult>;
}

/// A side-effecting step or an assertion condition.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, ctx: &FeatureContext) -> Result<()>;
}

/// Adapts an async closure into an [`Action`].
pub fn action<F>(f: F) -> FnAction<F>
where
    F: for<'a> Fn(&'a FeatureContext) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    FnAction(f)
}

/// Adapts an async closure into a [`Prerequisite`].
pub fn prerequisite<F>(f: F) -> FnPrerequisite<F>
where
    F: for<'a> Fn(&'a FeatureContext) -> BoxFuture<'a, Result<PrerequisiteResult>> + Send + Sync,
{
    FnPrerequisite(f)
}

pub struct FnAction<F>(F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: for<'a> Fn(&'a FeatureContext) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

pub struct FnPrerequisite<F>(F);

#[async_trait]
impl<F> Prerequisite for FnPrerequisite<F>
where
    F: for<'a> Fn(&'a FeatureContext) -> BoxFuture<'a, Result<PrerequisiteResult>> + Send + Sync,
{
    async fn evaluate(&self, ctx: &FeatureContext) -> Result<PrerequisiteResult> {
        (self.0)(ctx).await
    }
}

/// Store assertions run as steps against the context's store, poll settings
/// and cancellation.
#[async_trait]
impl Action for StoreAssertion {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        self.check(&ctx.match_context(), &ctx.poll, &ctx.cancel)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) enum StepKind {
    Prerequisite(Arc<dyn Prerequisite>),
    Action(Arc<dyn Action>),
}

/// Severity and maturity of an assert step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertMeta {
    pub grade: Grade,
    pub maturity: Maturity,
    pub group: String,
}

#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub phase: Phase,
    pub assert: Option<AssertMeta>,
    pub(crate) kind: StepKind,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("assert", &self.assert)
            .finish()
    }
}

/// A named sequence of steps.
///
/// Phases always run Prerequisite, Setup, Requirement, Assert, Teardown, no
/// matter the order steps were declared in; within a phase declaration order holds.
#[derive(Debug, Clone)]
pub struct Feature {
    name: String,
    steps: Vec<Step>,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps of `phase`, in declaration order.
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }

    pub fn prerequisite(mut self, name: &str, check: impl Prerequisite + 'static) -> Self {
        self.steps.push(Step {
            name: name.to_string(),
            phase: Phase::Prerequisite,
            assert: None,
            kind: StepKind::Prerequisite(Arc::new(check)),
        });
        self
    }

    pub fn setup(self, name: &str, step: impl Action + 'static) -> Self {
        self.push_action(name, Phase::Setup, step)
    }

    pub fn requirement(self, name: &str, step: impl Action + 'static) -> Self {
        self.push_action(name, Phase::Requirement, step)
    }

    /// Runs after everything else, also after a failed setup.
    pub fn teardown(self, name: &str, step: impl Action + 'static) -> Self {
        self.push_action(name, Phase::Teardown, step)
    }

    pub fn alpha(self, group: &str, build: impl FnOnce(AssertGroup) -> AssertGroup) -> Self {
        self.assertions(Maturity::Alpha, group, build)
    }

    pub fn beta(self, group: &str, build: impl FnOnce(AssertGroup) -> AssertGroup) -> Self {
        self.assertions(Maturity::Beta, group, build)
    }

    pub fn stable(self, group: &str, build: impl FnOnce(AssertGroup) -> AssertGroup) -> Self {
        self.assertions(Maturity::Stable, group, build)
    }

    /// Declares a group of assertions sharing `maturity`.
    pub fn assertions(
        mut self,
        maturity: Maturity,
        group: &str,
        build: impl FnOnce(AssertGroup) -> AssertGroup,
    ) -> Self {
        let group = build(AssertGroup {
            maturity,
            group: group.to_string(),
            steps: Vec::new(),
        });
        self.steps.extend(group.steps);
        self
    }

    fn push_action(mut self, name: &str, phase: Phase, step: impl Action + 'static) -> Self {
        self.steps.push(Step {
            name: name.to_string(),
            phase,
            assert: None,
            kind: StepKind::Action(Arc::new(step)),
        });
        self
    }
}

/// Builder for assertions of one maturity group.
pub struct AssertGroup {
    maturity: Maturity,
    group: String,
    steps: Vec<Step>,
}

impl AssertGroup {
    pub fn must(self, name: &str, condition: impl Action + 'static) -> Self {
        self.graded(Grade::Must, name, condition)
    }

    pub fn should(self, name: &str, condition: impl Action + 'static) -> Self {
        self.graded(Grade::Should, name, condition)
    }

    pub fn may(self, name: &str, condition: impl Action + 'static) -> Self {
        self.graded(Grade::May, name, condition)
    }

    pub fn graded(mut self, grade: Grade, name: &str, condition: impl Action + 'static) -> Self {
        self.steps.push(Step {
            name: name.to_string(),
            phase: Phase::Assert,
            assert: Some(AssertMeta {
                grade,
                maturity: self.maturity,
                group: self.group.clone(),
            }),
            kind: StepKind::Action(Arc::new(condition)),
        });
        self
    }
}
