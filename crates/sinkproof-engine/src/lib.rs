//! Feature execution engine for sinkproof.
//!
//! A [`Feature`] declares prerequisites, setup, requirements, graded
//! assertions and teardown. The [`Engine`] runs it against an explicit
//! [`FeatureContext`] and reports a [`FeatureResult`]; a [`Suite`] runs many
//! features concurrently, each in its own namespace.

pub mod context;
pub mod feature;
pub mod run;
pub mod suite;

pub use context::{Collaborators, FeatureContext, StateBag};
pub use feature::{
    Action, AssertGroup, AssertMeta, Feature, Prerequisite, PrerequisiteResult, Step, action,
    prerequisite,
};
pub use run::{Engine, RunOptions};
pub use sinkproof_schema::feature::{
    FeatureResult, FeatureStatus, Grade, Maturity, Phase, StepRecord, StepStatus,
};
pub use suite::{ExitPolicy, Suite, SuiteResult};
