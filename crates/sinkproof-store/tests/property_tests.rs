//! Property tests for sinkproof-store
//!
//! Snapshot stability and sequence assignment across arbitrary appends.

use proptest::prelude::*;
use sinkproof_store::EventStore;
use sinkproof_testkit::proptest::*;

proptest! {
    // Two snapshots with no append in between are equal.
    #[test]
    fn prop_snapshot_is_stable(events in prop::collection::vec(strategy_captured_event("sink"), 0..20)) {
        let store = EventStore::new();
        for e in events {
            store.append("sink", e);
        }
        prop_assert_eq!(store.snapshot("sink"), store.snapshot("sink"));
    }

    // Sequences are 0..n in append order, per receiver.
    #[test]
    fn prop_sequences_are_dense(
        routes in prop::collection::vec((0usize..3, strategy_captured_event("x")), 0..30)
    ) {
        let store = EventStore::new();
        let names = ["a", "b", "c"];
        let mut expected = [0usize; 3];
        for (i, event) in routes {
            let seq = store.append(names[i], event);
            prop_assert_eq!(seq as usize, expected[i]);
            expected[i] += 1;
        }
        for (i, name) in names.iter().enumerate() {
            let snapshot = store.snapshot(name);
            prop_assert_eq!(snapshot.len(), expected[i]);
            for (pos, e) in snapshot.iter().enumerate() {
                prop_assert_eq!(e.sequence as usize, pos);
                prop_assert_eq!(e.receiver.as_str(), *name);
            }
        }
    }

    // Appended events keep their content apart from sequence and receiver.
    #[test]
    fn prop_append_preserves_content(event in strategy_captured_event("sink")) {
        let store = EventStore::new();
        store.append("sink", event.clone());
        let stored = &store.snapshot("sink")[0];
        prop_assert_eq!(&stored.event_type, &event.event_type);
        prop_assert_eq!(&stored.security, &event.security);
        prop_assert_eq!(stored.kind, event.kind);
    }
}
