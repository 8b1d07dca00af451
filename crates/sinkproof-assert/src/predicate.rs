//! Pure per-event predicates and async context predicates.

use crate::context::MatchContext;
use async_trait::async_trait;
use sinkproof_schema::event::{CapturedEvent, EventKind};
use std::fmt;
use std::sync::Arc;

/// A pure test over one captured event.
pub trait EventPredicate: Send + Sync {
    fn matches(&self, event: &CapturedEvent) -> bool;
    fn describe(&self) -> String;
}

/// Closure-backed predicate; the building block for the helpers below.
#[derive(Clone)]
pub struct Predicate {
    description: String,
    test: Arc<dyn Fn(&CapturedEvent) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new<F>(description: impl Into<String>, test: F) -> Self
    where
        F: Fn(&CapturedEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    pub fn and(self, other: impl EventPredicate + 'static) -> Self {
        let description = format!("{} and {}", self.description, other.describe());
        Self::new(description, move |e| (self.test)(e) && other.matches(e))
    }

    pub fn or(self, other: impl EventPredicate + 'static) -> Self {
        let description = format!("({} or {})", self.description, other.describe());
        Self::new(description, move |e| (self.test)(e) || other.matches(e))
    }

    pub fn negate(self) -> Self {
        let description = format!("not {}", self.description);
        Self::new(description, move |e| !(self.test)(e))
    }
}

impl EventPredicate for Predicate {
    fn matches(&self, event: &CapturedEvent) -> bool {
        (self.test)(event)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

/// Matches every event.
pub fn any() -> Predicate {
    Predicate::new("any event", |_| true)
}

pub fn has_type(event_type: &str) -> Predicate {
    let expected = event_type.to_string();
    Predicate::new(format!("type {event_type}"), move |e| {
        e.event_type.as_deref() == Some(expected.as_str())
    })
}

pub fn has_source(source: &str) -> Predicate {
    let expected = source.to_string();
    Predicate::new(format!("source {source}"), move |e| {
        e.event_source.as_deref() == Some(expected.as_str())
    })
}

pub fn has_id(id: &str) -> Predicate {
    let expected = id.to_string();
    Predicate::new(format!("id {id}"), move |e| {
        e.event_id.as_deref() == Some(expected.as_str())
    })
}

/// Extension attribute `name` is present, and equal to `value` when given.
pub fn has_extension(name: &str, value: Option<&str>) -> Predicate {
    let name = name.to_ascii_lowercase();
    let value = value.map(str::to_string);
    let description = match &value {
        Some(v) => format!("extension {name}={v}"),
        None => format!("extension {name}"),
    };
    Predicate::new(description, move |e| match (e.extension(&name), &value) {
        (Some(actual), Some(expected)) => actual == expected,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

pub fn kind(kind: EventKind) -> Predicate {
    Predicate::new(format!("kind {kind:?}"), move |e| e.kind == kind)
}

pub fn has_bearer_token() -> Predicate {
    Predicate::new("bearer token present", |e| e.security.bearer_token.is_some())
}

pub fn over_tls() -> Predicate {
    Predicate::new("received over TLS", |e| e.security.is_tls())
}

/// Outcome of a context predicate on one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextVerdict {
    pub matched: bool,
    /// Short explanation, shown in failure reports.
    pub detail: String,
    /// Set when a later attempt may decide differently for the same event.
    /// Such verdicts are not memoized.
    pub transient: bool,
}

impl ContextVerdict {
    pub fn matched(detail: impl Into<String>) -> Self {
        Self {
            matched: true,
            detail: detail.into(),
            transient: false,
        }
    }

    pub fn unmatched(detail: impl Into<String>) -> Self {
        Self {
            matched: false,
            detail: detail.into(),
            transient: false,
        }
    }

    /// Not matched for now; re-evaluated on the next attempt.
    pub fn retry(detail: impl Into<String>) -> Self {
        Self {
            transient: true,
            ..Self::unmatched(detail)
        }
    }
}

/// A test over one event that needs the run's collaborators, e.g. an identity check.
#[async_trait]
pub trait ContextPredicate: Send + Sync {
    async fn evaluate(&self, ctx: &MatchContext, event: &CapturedEvent) -> ContextVerdict;
    fn describe(&self) -> String;
}
