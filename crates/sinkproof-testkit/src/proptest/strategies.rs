use proptest::prelude::*;
use sinkproof_schema::event::{CapturedEvent, EventKind};

/// Lowercase RFC 1123 label, up to 30 characters.
pub fn strategy_dns_label() -> impl Strategy<Value = String> {
    "[a-z]([a-z0-9-]{0,28}[a-z0-9])?"
}

pub fn strategy_event_kind() -> impl Strategy<Value = EventKind> {
    prop_oneof![Just(EventKind::EventReceived), Just(EventKind::EventRejected)]
}

/// Reverse-DNS style CloudEvents type.
pub fn strategy_event_type() -> impl Strategy<Value = String> {
    "[a-z]{2,8}(\\.[a-z]{2,8}){1,3}"
}

/// Audience strings, including ones that are prefixes of each other.
pub fn strategy_audience() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("audience".to_string()),
        Just("aud".to_string()),
        Just("audience-extra".to_string()),
        "[a-z0-9:/.-]{1,40}",
    ]
}

/// Kubernetes service account subject.
pub fn strategy_subject() -> impl Strategy<Value = String> {
    (strategy_dns_label(), strategy_dns_label())
        .prop_map(|(ns, sa)| sinkproof_schema::resource::service_account_subject(&ns, &sa))
}

/// A captured event for `receiver`, optionally with a type and a token.
pub fn strategy_captured_event(receiver: &str) -> impl Strategy<Value = CapturedEvent> {
    let receiver = receiver.to_string();
    (
        strategy_event_kind(),
        proptest::option::of(strategy_event_type()),
        proptest::option::of("[A-Za-z0-9_-]{8,24}"),
    )
        .prop_map(move |(kind, event_type, token)| {
            let mut event = CapturedEvent::new(receiver.clone(), kind);
            event.event_type = event_type;
            event.security.bearer_token = token;
            event
        })
}

/// `matching` trues and up to `max_other` falses in a random order.
pub fn strategy_interleaving(
    matching: std::ops::Range<usize>,
    max_other: usize,
) -> impl Strategy<Value = Vec<bool>> {
    (matching, 0..=max_other)
        .prop_flat_map(|(k, other)| {
            let mut flags = vec![true; k];
            flags.extend(std::iter::repeat_n(false, other));
            Just(flags).prop_shuffle()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn dns_labels_are_valid(label in strategy_dns_label()) {
            prop_assert!(sinkproof_ids::is_dns1123_label(&label));
        }

        #[test]
        fn interleaving_keeps_counts(flags in strategy_interleaving(0..5, 6)) {
            let k = flags.iter().filter(|f| **f).count();
            prop_assert!(k < 5);
            prop_assert!(flags.len() - k <= 6);
        }

        #[test]
        fn subjects_have_service_account_form(subject in strategy_subject()) {
            prop_assert!(subject.starts_with("system:serviceaccount:"));
            prop_assert_eq!(subject.split(':').count(), 4);
        }
    }
}
