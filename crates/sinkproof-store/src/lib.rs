//! Per-receiver log of captured events.
//!
//! Receivers append from their connection tasks while assertions take
//! snapshots; locks are only held for the push or the copy, never while a
//! predicate runs over the data.

use sinkproof_schema::event::CapturedEvent;
use sinkproof_schema::resource::ReceiverOptions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

#[derive(Default)]
struct ReceiverLog {
    options: Mutex<ReceiverOptions>,
    events: Mutex<Vec<CapturedEvent>>,
}

#[derive(Default)]
struct Inner {
    logs: RwLock<HashMap<String, Arc<ReceiverLog>>>,
    appended: Notify,
}

/// Event store shared by every receiver of one feature run.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone, Default)]
pub struct EventStore {
    inner: Arc<Inner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the log for `receiver` and remembers how it was started.
    ///
    /// Registering again keeps the captured events and replaces the options.
    pub fn register(&self, receiver: &str, options: ReceiverOptions) {
        let log = self.log_or_insert(receiver);
        *lock(&log.options) = options;
        tracing::debug!(receiver, "registered receiver log");
    }

    /// Options the receiver was registered with, if it was.
    pub fn receiver_options(&self, receiver: &str) -> Option<ReceiverOptions> {
        self.log(receiver).map(|log| lock(&log.options).clone())
    }

    /// Appends `event` to `receiver`'s log and returns its sequence number.
    ///
    /// Unknown receivers get a log on first append.
    pub fn append(&self, receiver: &str, mut event: CapturedEvent) -> u64 {
        let log = self.log_or_insert(receiver);
        let sequence = {
            let mut events = lock(&log.events);
            let sequence = events.len() as u64;
            event.sequence = sequence;
            event.receiver = receiver.to_string();
            events.push(event);
            sequence
        };
        self.inner.appended.notify_waiters();
        tracing::trace!(receiver, sequence, "captured event appended");
        sequence
    }

    /// Point-in-time copy of `receiver`'s log, in insertion order.
    ///
    /// Empty for receivers that have seen nothing.
    pub fn snapshot(&self, receiver: &str) -> Vec<CapturedEvent> {
        self.log(receiver)
            .map(|log| lock(&log.events).clone())
            .unwrap_or_default()
    }

    /// Events of `receiver` from sequence `offset` on. Readers that follow a
    /// log copy only what they have not seen yet.
    pub fn snapshot_from(&self, receiver: &str, offset: usize) -> Vec<CapturedEvent> {
        self.log(receiver)
            .map(|log| {
                let events = lock(&log.events);
                events.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, receiver: &str) -> usize {
        self.log(receiver)
            .map(|log| lock(&log.events).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, receiver: &str) -> bool {
        self.len(receiver) == 0
    }

    pub fn is_registered(&self, receiver: &str) -> bool {
        self.log(receiver).is_some()
    }

    /// Names of all receivers with a log, sorted.
    pub fn receivers(&self) -> Vec<String> {
        let logs = self
            .inner
            .logs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = logs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every log. Handles held elsewhere see an empty store afterwards.
    pub fn clear(&self) {
        self.inner
            .logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Resolves after the next append to any receiver.
    ///
    /// Call `enable()` on the pinned future before taking a snapshot so an
    /// append racing with the snapshot is not missed.
    pub fn appended(&self) -> Notified<'_> {
        self.inner.appended.notified()
    }

    fn log(&self, receiver: &str) -> Option<Arc<ReceiverLog>> {
        self.inner
            .logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(receiver)
            .cloned()
    }

    fn log_or_insert(&self, receiver: &str) -> Arc<ReceiverLog> {
        if let Some(log) = self.log(receiver) {
            return log;
        }
        self.inner
            .logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(receiver.to_string())
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("receivers", &self.receivers())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sinkproof_schema::event::EventKind;
    use std::time::Duration;

    fn event(event_type: &str) -> CapturedEvent {
        CapturedEvent::new("ignored", EventKind::EventReceived).with_type(event_type)
    }

    #[test]
    fn append_assigns_sequence_per_receiver() {
        let store = EventStore::new();
        assert_eq!(store.append("a", event("x")), 0);
        assert_eq!(store.append("a", event("y")), 1);
        assert_eq!(store.append("b", event("z")), 0);

        let a = store.snapshot("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].event_type.as_deref(), Some("x"));
        assert_eq!(a[1].sequence, 1);
        assert_eq!(a[1].receiver, "a");
    }

    #[test]
    fn unknown_receiver_snapshot_is_empty() {
        let store = EventStore::new();
        assert!(store.snapshot("nope").is_empty());
        assert!(!store.is_registered("nope"));
        assert!(store.is_empty("nope"));
    }

    #[test]
    fn register_keeps_events_and_updates_options() {
        let store = EventStore::new();
        store.register("sink", ReceiverOptions::default());
        store.append("sink", event("x"));
        store.register("sink", ReceiverOptions::default().with_audience("audience"));

        assert_eq!(store.len("sink"), 1);
        assert_eq!(
            store.receiver_options("sink").unwrap().audience.as_deref(),
            Some("audience")
        );
        assert_eq!(store.receivers(), vec!["sink".to_string()]);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = EventStore::new();
        store.append("sink", event("x"));
        let before = store.snapshot("sink");
        store.append("sink", event("y"));
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot("sink").len(), 2);
    }

    #[test]
    fn snapshot_from_copies_only_the_tail() {
        let store = EventStore::new();
        for t in ["a", "b", "c"] {
            store.append("sink", event(t));
        }
        let tail = store.snapshot_from("sink", 1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 1);
        assert_eq!(tail[1].event_type.as_deref(), Some("c"));
        assert_eq!(store.snapshot_from("sink", 0), store.snapshot("sink"));
        assert!(store.snapshot_from("sink", 3).is_empty());
        assert!(store.snapshot_from("sink", 10).is_empty());
        assert!(store.snapshot_from("nope", 0).is_empty());
    }

    #[test]
    fn clear_drops_logs() {
        let store = EventStore::new();
        let other = store.clone();
        store.append("sink", event("x"));
        other.clear();
        assert!(store.receivers().is_empty());
    }

    #[tokio::test]
    async fn appended_wakes_waiters() {
        let store = EventStore::new();
        let writer = store.clone();

        let notified = store.appended();
        tokio::pin!(notified);
        notified.as_mut().enable();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.append("sink", event("x"));
        });

        tokio::time::timeout(Duration::from_secs(2), notified)
            .await
            .expect("append should wake the waiter");
        assert_eq!(store.len("sink"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_lose_nothing() {
        let store = EventStore::new();
        let mut handles = Vec::new();
        for w in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    store.append("sink", event(&format!("w{w}-{i}")));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snapshot = store.snapshot("sink");
        assert_eq!(snapshot.len(), 2000);
        for (i, e) in snapshot.iter().enumerate() {
            assert_eq!(e.sequence, i as u64);
        }
    }
}
