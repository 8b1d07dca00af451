use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases run in this order; steps inside a phase run in declared order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Prerequisite,
    Setup,
    Requirement,
    Assert,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Prerequisite => "prerequisite",
            Phase::Setup => "setup",
            Phase::Requirement => "requirement",
            Phase::Assert => "assert",
            Phase::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Severity of an assertion.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    /// Failure fails the feature.
    Must,
    /// Failure is recorded, feature still passes.
    Should,
    /// Informational.
    May,
}

impl Grade {
    pub const ALL: [Grade; 3] = [Grade::Must, Grade::Should, Grade::May];
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::Must => "MUST",
            Grade::Should => "SHOULD",
            Grade::May => "MAY",
        };
        f.write_str(s)
    }
}

/// Maturity of the behaviour an assertion group covers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Maturity {
    Alpha,
    Beta,
    Stable,
}

impl Maturity {
    pub const ALL: [Maturity; 3] = [Maturity::Alpha, Maturity::Beta, Maturity::Stable];
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Passed,
    Failed,
    /// Deselected by run options.
    Skipped,
    /// Never reached because an earlier step made it moot.
    NotRun,
}

/// Outcome of one step.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub phase: Phase,
    /// Only set for assert steps.
    pub grade: Option<Grade>,
    /// Only set for assert steps.
    pub maturity: Option<Maturity>,
    /// Name of the assertion group, for assert steps.
    pub group: Option<String>,
    pub status: StepStatus,
    /// Failure or skip reason, including the last observed state for timeouts.
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, phase: Phase, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            phase,
            grade: None,
            maturity: None,
            group: None,
            status,
            message: None,
            duration_ms: 0,
        }
    }

    pub fn is_failed_must(&self) -> bool {
        self.status == StepStatus::Failed && self.grade == Some(Grade::Must)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FeatureStatus {
    Passed,
    Failed,
    /// An unmet prerequisite. Not a failure: the environment does not support the feature.
    Skipped { prerequisite: String, reason: String },
}

/// Aggregate outcome of running one feature.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureResult {
    pub feature: String,
    pub status: FeatureStatus,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FeatureResult {
    pub fn is_passed(&self) -> bool {
        self.status == FeatureStatus::Passed
    }

    pub fn is_failed(&self) -> bool {
        self.status == FeatureStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, FeatureStatus::Skipped { .. })
    }

    /// Failed `Must` assertions, in declared order.
    pub fn failed_musts(&self) -> Vec<&StepRecord> {
        self.steps.iter().filter(|s| s.is_failed_must()).collect()
    }

    pub fn first_must_failure(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.is_failed_must())
    }

    pub fn failed_shoulds(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed && s.grade == Some(Grade::Should))
            .collect()
    }

    /// The setup or requirement step that aborted the run, if any.
    pub fn fatal_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| {
            s.status == StepStatus::Failed
                && matches!(
                    s.phase,
                    Phase::Prerequisite | Phase::Setup | Phase::Requirement
                )
        })
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_step(name: &str, grade: Grade, status: StepStatus) -> StepRecord {
        StepRecord {
            grade: Some(grade),
            maturity: Some(Maturity::Stable),
            ..StepRecord::new(name, Phase::Assert, status)
        }
    }

    fn result(steps: Vec<StepRecord>, status: FeatureStatus) -> FeatureResult {
        FeatureResult {
            feature: "f".into(),
            status,
            steps,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn failed_musts_keep_declared_order() {
        let r = result(
            vec![
                assert_step("a", Grade::Must, StepStatus::Passed),
                assert_step("b", Grade::Must, StepStatus::Failed),
                assert_step("c", Grade::Should, StepStatus::Failed),
                assert_step("d", Grade::Must, StepStatus::Failed),
            ],
            FeatureStatus::Failed,
        );
        let names: Vec<_> = r.failed_musts().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "d"]);
        assert_eq!(r.first_must_failure().unwrap().name, "b");
        assert_eq!(r.failed_shoulds().len(), 1);
    }

    #[test]
    fn fatal_step_ignores_asserts() {
        let r = result(
            vec![
                StepRecord::new("install", Phase::Setup, StepStatus::Failed),
                assert_step("a", Grade::Must, StepStatus::NotRun),
            ],
            FeatureStatus::Failed,
        );
        assert_eq!(r.fatal_step().unwrap().name, "install");
        assert!(r.first_must_failure().is_none());
    }

    #[test]
    fn skipped_status_serializes_with_prerequisite() {
        let status = FeatureStatus::Skipped {
            prerequisite: "OIDC authentication is enabled".into(),
            reason: "disabled".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["prerequisite"], "OIDC authentication is enabled");
    }

    #[test]
    fn phases_order() {
        assert!(Phase::Prerequisite < Phase::Setup);
        assert!(Phase::Setup < Phase::Requirement);
        assert!(Phase::Requirement < Phase::Assert);
        assert!(Phase::Assert < Phase::Teardown);
    }
}
