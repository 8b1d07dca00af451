//! Bounded, cancellable retry loop for eventually consistent checks.

use serde::{Deserialize, Serialize};
use sinkproof_cancel::{CancelReason, CancelSignal};
use sinkproof_store::EventStore;
use std::future::{Future, pending};
use std::time::Duration;
use tokio::time::Instant;

/// Poll configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between attempts in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Overall budget in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What one attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    /// Not yet; try again.
    Pending,
    /// Can never become satisfied; stop polling.
    Failed,
}

/// Result of one attempt plus what it saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe<T> {
    pub verdict: Verdict,
    pub observation: T,
}

impl<T> Probe<T> {
    pub fn satisfied(observation: T) -> Self {
        Self {
            verdict: Verdict::Satisfied,
            observation,
        }
    }

    pub fn pending(observation: T) -> Self {
        Self {
            verdict: Verdict::Pending,
            observation,
        }
    }

    pub fn failed(observation: T) -> Self {
        Self {
            verdict: Verdict::Failed,
            observation,
        }
    }

    /// `Satisfied` when `ok`, else `Pending`.
    pub fn from_bool(ok: bool, observation: T) -> Self {
        if ok {
            Self::satisfied(observation)
        } else {
            Self::pending(observation)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Satisfied {
        observation: T,
        attempts: u32,
    },
    /// A probe reported the condition can no longer hold.
    Failed {
        observation: T,
        attempts: u32,
    },
    TimedOut {
        /// What the last completed attempt saw.
        observation: Option<T>,
        attempts: u32,
    },
    Cancelled {
        reason: CancelReason,
        observation: Option<T>,
        attempts: u32,
    },
}

impl<T> PollOutcome<T> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Satisfied { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::TimedOut { attempts, .. }
            | PollOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn observation(&self) -> Option<&T> {
        match self {
            PollOutcome::Satisfied { observation, .. } | PollOutcome::Failed { observation, .. } => {
                Some(observation)
            }
            PollOutcome::TimedOut { observation, .. }
            | PollOutcome::Cancelled { observation, .. } => observation.as_ref(),
        }
    }
}

/// Runs a probe until it is satisfied, fails, times out, or is cancelled.
///
/// Attempts are spaced by the configured interval. With a store attached, an
/// append wakes the poller early.
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollConfig,
    store: Option<EventStore>,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    pub fn with_store(mut self, store: EventStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Polls `probe`, passing it the 1-based attempt number.
    ///
    /// At least one attempt is made even with a zero timeout. The call
    /// returns no later than the timeout plus the time of one in-flight probe
    /// step, and promptly once `cancel` fires.
    pub async fn until<T, F, Fut>(&self, cancel: &CancelSignal, mut probe: F) -> PollOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        let deadline = Instant::now() + self.config.timeout();
        let mut attempts = 0;
        let mut last = None;

        loop {
            if let Some(reason) = cancel.reason() {
                return PollOutcome::Cancelled {
                    reason,
                    observation: last,
                    attempts,
                };
            }

            // Registered before probing so an append during the probe still wakes us.
            let mut appended = self.store.as_ref().map(|s| Box::pin(s.appended()));
            if let Some(notified) = appended.as_mut() {
                notified.as_mut().enable();
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                reason = cancel.cancelled() => {
                    return PollOutcome::Cancelled { reason, observation: last, attempts };
                }
                result = probe(attempts) => result,
                _ = tokio::time::sleep_until(deadline) => {
                    return PollOutcome::TimedOut { observation: last, attempts };
                }
            };

            match result.verdict {
                Verdict::Satisfied => {
                    return PollOutcome::Satisfied {
                        observation: result.observation,
                        attempts,
                    };
                }
                Verdict::Failed => {
                    return PollOutcome::Failed {
                        observation: result.observation,
                        attempts,
                    };
                }
                Verdict::Pending => last = Some(result.observation),
            }

            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::TimedOut {
                    observation: last,
                    attempts,
                };
            }
            let wait = self.config.interval().min(deadline - now);
            let woken = async {
                match appended {
                    Some(notified) => notified.await,
                    None => pending().await,
                }
            };
            tokio::select! {
                biased;
                reason = cancel.cancelled() => {
                    return PollOutcome::Cancelled { reason, observation: last, attempts };
                }
                _ = tokio::time::sleep(wait) => {}
                _ = woken => {
                    tracing::trace!(attempts, "store append woke poller");
                }
            }
        }
    }
}
