//! Expectations on an installed source's status.
//!
//! Status is eventually consistent, so every expectation polls the installer
//! until it holds, with the context's poll settings.

use anyhow::Result;
use async_trait::async_trait;
use sinkproof_assert::{PollOutcome, Poller, Probe};
use sinkproof_engine::{Action, FeatureContext};
use sinkproof_error::SinkproofError;
use sinkproof_schema::resource::{Gvr, ResourceStatus};

/// What a [`StatusExpectation`] requires of the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    Ready,
    HttpsSink,
    CaCerts,
}

impl StatusCheck {
    /// Whether `status` meets the check, and what was seen.
    fn probe(self, status: &ResourceStatus) -> Probe<String> {
        match self {
            StatusCheck::Ready => Probe::from_bool(
                status.ready,
                status
                    .not_ready_reason()
                    .unwrap_or_else(|| "ready".to_string()),
            ),
            StatusCheck::HttpsSink => {
                let uri = status.sink_uri.as_deref().unwrap_or_default();
                Probe::from_bool(
                    uri.to_ascii_lowercase().starts_with("https://"),
                    format!("sink uri {uri:?}"),
                )
            }
            StatusCheck::CaCerts => {
                let present = status
                    .sink_ca_certs
                    .as_deref()
                    .is_some_and(|pem| !pem.trim().is_empty());
                Probe::from_bool(
                    present,
                    if present {
                        "sink CA certs set".to_string()
                    } else {
                        "sink CA certs empty".to_string()
                    },
                )
            }
        }
    }

    fn describe(self) -> &'static str {
        match self {
            StatusCheck::Ready => "ready",
            StatusCheck::HttpsSink => "sink URI is https",
            StatusCheck::CaCerts => "sink CA certs are set",
        }
    }
}

/// Polls a resource's status until a [`StatusCheck`] holds.
#[derive(Debug, Clone)]
pub struct StatusExpectation {
    gvr: Gvr,
    name: String,
    check: StatusCheck,
}

/// The resource reports ready.
pub fn is_ready(gvr: &Gvr, name: &str) -> StatusExpectation {
    expect(gvr, name, StatusCheck::Ready)
}

/// The resolved sink URI uses the `https` scheme.
pub fn expect_https_sink(gvr: &Gvr, name: &str) -> StatusExpectation {
    expect(gvr, name, StatusCheck::HttpsSink)
}

/// The resource trusts a non-empty CA bundle for its sink.
pub fn expect_ca_certs(gvr: &Gvr, name: &str) -> StatusExpectation {
    expect(gvr, name, StatusCheck::CaCerts)
}

fn expect(gvr: &Gvr, name: &str, check: StatusCheck) -> StatusExpectation {
    StatusExpectation {
        gvr: gvr.clone(),
        name: name.to_string(),
        check,
    }
}

impl StatusExpectation {
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.gvr.resource, self.name, self.check.describe())
    }
}

#[async_trait]
impl Action for StatusExpectation {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        let poller = Poller::new(ctx.poll.clone());
        let outcome = poller
            .until(&ctx.cancel, move |_| async move {
                match ctx.installer().status(&ctx.scope, &self.gvr, &self.name).await {
                    Ok(status) => self.check.probe(&status),
                    Err(e) => Probe::pending(format!("status unavailable: {e:#}")),
                }
            })
            .await;

        match outcome {
            PollOutcome::Satisfied { attempts, .. } => {
                tracing::debug!(check = %self.describe(), attempts, "status expectation met");
                Ok(())
            }
            PollOutcome::Failed { observation, .. } => Err(SinkproofError::AssertionFailed {
                assertion: self.describe(),
                last_observed: observation,
            }
            .into()),
            PollOutcome::TimedOut { observation, .. } => Err(SinkproofError::AssertionTimeout {
                assertion: self.describe(),
                timeout_ms: ctx.poll.timeout_ms,
                last_observed: observation.unwrap_or_else(|| "no status observed".into()),
            }
            .into()),
            PollOutcome::Cancelled { reason, .. } => {
                Err(SinkproofError::cancelled(self.describe(), reason).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinkproof_assert::Verdict;
    use sinkproof_schema::resource::Condition;

    #[test]
    fn ready_probe_reports_failing_conditions() {
        let status = ResourceStatus {
            conditions: vec![Condition {
                condition_type: "SinkProvided".into(),
                status: false,
                reason: None,
                message: Some("no sink".into()),
            }],
            ..ResourceStatus::default()
        };
        let probe = StatusCheck::Ready.probe(&status);
        assert_eq!(probe.verdict, Verdict::Pending);
        assert_eq!(probe.observation, "SinkProvided: no sink");
    }

    #[test]
    fn https_probe_checks_scheme() {
        let mut status = ResourceStatus {
            sink_uri: Some("http://sink".into()),
            ..ResourceStatus::default()
        };
        assert_eq!(StatusCheck::HttpsSink.probe(&status).verdict, Verdict::Pending);
        status.sink_uri = Some("HTTPS://sink".into());
        assert_eq!(StatusCheck::HttpsSink.probe(&status).verdict, Verdict::Satisfied);
    }

    #[test]
    fn blank_ca_bundle_does_not_count() {
        let status = ResourceStatus {
            sink_ca_certs: Some("  \n".into()),
            ..ResourceStatus::default()
        };
        assert_eq!(StatusCheck::CaCerts.probe(&status).verdict, Verdict::Pending);
    }

    #[test]
    fn describes_resource_and_check() {
        let gvr = Gvr::new("sources.knative.dev", "v1alpha1", "integrationsources");
        assert_eq!(
            expect_https_sink(&gvr, "src").describe(),
            "integrationsources src sink URI is https"
        );
    }
}
