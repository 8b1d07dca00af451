//! `on_store(receiver).match_event(..).at_least(n)` and friends.

use crate::context::MatchContext;
use crate::poll::{PollConfig, PollOutcome, Poller, Probe, Verdict};
use crate::predicate::{ContextPredicate, ContextVerdict, EventPredicate};
use sinkproof_cancel::CancelSignal;
use sinkproof_error::SinkproofError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Events kept in a failure report.
const REPORTED_EVENTS: usize = 5;

/// How many matches an assertion needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// Satisfied once `n` events match. Polls.
    AtLeast(usize),
    /// Satisfied when exactly `n` match; fails as soon as more do. Polls.
    Exactly(usize),
    /// No event may match. Evaluated once.
    None,
}

impl Threshold {
    pub fn verdict(&self, matched: usize) -> Verdict {
        match *self {
            Threshold::AtLeast(n) if matched >= n => Verdict::Satisfied,
            Threshold::AtLeast(_) => Verdict::Pending,
            Threshold::Exactly(n) if matched == n => Verdict::Satisfied,
            Threshold::Exactly(n) if matched > n => Verdict::Failed,
            Threshold::Exactly(_) => Verdict::Pending,
            Threshold::None if matched == 0 => Verdict::Satisfied,
            Threshold::None => Verdict::Failed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::AtLeast(n) => write!(f, "at least {n}"),
            Threshold::Exactly(n) => write!(f, "exactly {n}"),
            Threshold::None => f.write_str("no"),
        }
    }
}

/// What one evaluation of an assertion saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub total: usize,
    pub matched: usize,
    /// Summaries of the most recent events, with context verdicts where evaluated.
    pub recent: Vec<String>,
}

impl Observation {
    pub fn summary(&self) -> String {
        let mut out = format!("{} of {} events matched", self.matched, self.total);
        if !self.recent.is_empty() {
            out.push_str("; recent: ");
            out.push_str(&self.recent.join(" | "));
        }
        out
    }
}

/// Entry point: assertions over the log of `receiver`.
pub fn on_store(receiver: &str) -> StoreMatcher {
    StoreMatcher {
        receiver: receiver.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StoreMatcher {
    receiver: String,
}

impl StoreMatcher {
    pub fn match_event(self, predicate: impl EventPredicate + 'static) -> EventMatch {
        EventMatch {
            receiver: self.receiver,
            event: Arc::new(predicate),
            context: None,
        }
    }

    /// Events must pass `predicate`, then `context` (evaluated only for those).
    pub fn match_with_context(
        self,
        predicate: impl EventPredicate + 'static,
        context: impl ContextPredicate + 'static,
    ) -> EventMatch {
        EventMatch {
            receiver: self.receiver,
            event: Arc::new(predicate),
            context: Some(Arc::new(context)),
        }
    }
}

#[derive(Clone)]
pub struct EventMatch {
    receiver: String,
    event: Arc<dyn EventPredicate>,
    context: Option<Arc<dyn ContextPredicate>>,
}

impl EventMatch {
    pub fn at_least(self, n: usize) -> StoreAssertion {
        self.with_threshold(Threshold::AtLeast(n))
    }

    pub fn exactly(self, n: usize) -> StoreAssertion {
        self.with_threshold(Threshold::Exactly(n))
    }

    pub fn none(self) -> StoreAssertion {
        self.with_threshold(Threshold::None)
    }

    fn with_threshold(self, threshold: Threshold) -> StoreAssertion {
        StoreAssertion {
            receiver: self.receiver,
            event: self.event,
            context: self.context,
            threshold,
        }
    }
}

/// A complete assertion, ready to be checked against a store.
#[derive(Clone)]
pub struct StoreAssertion {
    receiver: String,
    event: Arc<dyn EventPredicate>,
    context: Option<Arc<dyn ContextPredicate>>,
    threshold: Threshold,
}

type VerdictCache = HashMap<u64, ContextVerdict>;

impl StoreAssertion {
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "{} events on {} matching {}",
            self.threshold,
            self.receiver,
            self.event.describe()
        );
        if let Some(context) = &self.context {
            out.push_str(" with ");
            out.push_str(&context.describe());
        }
        out
    }

    /// One pass over the current snapshot.
    ///
    /// Context verdicts are looked up in `cache` by sequence number first, so
    /// an event's identity is verified at most once per cache. Transient
    /// verdicts are not cached and get re-evaluated on the next pass.
    async fn evaluate(&self, ctx: &MatchContext, cache: &mut VerdictCache) -> Probe<Observation> {
        let events = ctx.store.snapshot(&self.receiver);
        let mut matched = 0;
        let mut lines = Vec::with_capacity(events.len());

        for event in &events {
            let mut line = event.summary();
            if self.event.matches(event) {
                let passed = match &self.context {
                    None => true,
                    Some(context) => {
                        let verdict = match cache.get(&event.sequence) {
                            Some(verdict) => verdict.clone(),
                            None => {
                                let verdict = context.evaluate(ctx, event).await;
                                if !verdict.transient {
                                    cache.insert(event.sequence, verdict.clone());
                                }
                                verdict
                            }
                        };
                        line.push_str(&format!(" [{}]", verdict.detail));
                        verdict.matched
                    }
                };
                if passed {
                    matched += 1;
                }
            }
            lines.push(line);
        }

        let skip = lines.len().saturating_sub(REPORTED_EVENTS);
        let observation = Observation {
            total: events.len(),
            matched,
            recent: lines.split_off(skip),
        };
        Probe {
            verdict: self.threshold.verdict(matched),
            observation,
        }
    }

    /// Polls until the threshold holds.
    ///
    /// `None` thresholds are evaluated exactly once.
    pub async fn check(
        &self,
        ctx: &MatchContext,
        poll: &PollConfig,
        cancel: &CancelSignal,
    ) -> Result<Observation, SinkproofError> {
        let config = match self.threshold {
            Threshold::None => PollConfig {
                timeout_ms: 0,
                ..poll.clone()
            },
            _ => poll.clone(),
        };
        let poller = Poller::new(config.clone()).with_store(ctx.store.clone());
        let cache = Mutex::new(VerdictCache::new());

        let outcome = poller
            .until(cancel, |_| {
                let cache = &cache;
                async move {
                    let mut cache = cache.lock().await;
                    self.evaluate(ctx, &mut cache).await
                }
            })
            .await;

        let assertion = self.describe();
        match outcome {
            PollOutcome::Satisfied {
                observation,
                attempts,
            } => {
                tracing::debug!(%assertion, attempts, matched = observation.matched, "assertion satisfied");
                Ok(observation)
            }
            PollOutcome::Failed { observation, .. } => Err(SinkproofError::AssertionFailed {
                assertion,
                last_observed: observation.summary(),
            }),
            PollOutcome::TimedOut { observation, .. } => Err(SinkproofError::AssertionTimeout {
                assertion,
                timeout_ms: config.timeout_ms,
                last_observed: observation
                    .map(|o| o.summary())
                    .unwrap_or_else(|| "no evaluation completed".to_string()),
            }),
            PollOutcome::Cancelled { reason, .. } => {
                Err(SinkproofError::cancelled(assertion, reason))
            }
        }
    }
}

impl fmt::Debug for StoreAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreAssertion").field(&self.describe()).finish()
    }
}
