//! Cancellation for sinkproof runs.
//!
//! A [`CancelSignal`] fires when it is cancelled explicitly, when its deadline
//! passes, or when its parent fires. Children never cancel their parent.

use futures::future::BoxFuture;
use std::future::{Future, pending};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

pub use sinkproof_error::CancelReason;

struct Inner {
    tx: watch::Sender<Option<CancelReason>>,
    parent: Option<CancelSignal>,
    deadline: Option<Instant>,
}

/// Cloneable cancellation handle. Clones share state.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    /// A root signal with no deadline.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(parent: Option<CancelSignal>, deadline: Option<Instant>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                tx,
                parent,
                deadline,
            }),
        }
    }

    /// A signal that fires with this one but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), None)
    }

    /// A child that additionally fires once `timeout` has elapsed.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        self.with_deadline_at(Instant::now() + timeout)
    }

    pub fn with_deadline_at(&self, deadline: Instant) -> Self {
        Self::build(Some(self.clone()), Some(deadline))
    }

    /// Cancels this signal and its descendants. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        let changed = self.inner.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(%reason, "cancel signal fired");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Why the signal fired, or `None` while it is still live.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = *self.inner.tx.borrow() {
            return Some(reason);
        }
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Some(CancelReason::DeadlineExceeded);
        }
        self.inner.parent.as_ref().and_then(CancelSignal::reason)
    }

    /// Earliest deadline along the chain of ancestors.
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(CancelSignal::deadline);
        match (self.inner.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the signal fires.
    pub fn cancelled(&self) -> BoxFuture<'_, CancelReason> {
        Box::pin(async move {
            let mut rx = self.inner.tx.subscribe();
            let own = async {
                loop {
                    if let Some(reason) = *rx.borrow_and_update() {
                        return reason;
                    }
                    if rx.changed().await.is_err() {
                        return pending().await;
                    }
                }
            };
            let deadline = async {
                match self.inner.deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(deadline).await;
                        CancelReason::DeadlineExceeded
                    }
                    None => pending().await,
                }
            };
            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.cancelled().await,
                    None => pending().await,
                }
            };

            tokio::select! {
                reason = own => reason,
                reason = deadline => reason,
                reason = parent => reason,
            }
        })
    }

    /// Runs `fut` unless the signal fires first.
    ///
    /// An already-fired signal wins without polling `fut`.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Result<F::Output, CancelReason>
    where
        F: Future,
    {
        if let Some(reason) = self.reason() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}
