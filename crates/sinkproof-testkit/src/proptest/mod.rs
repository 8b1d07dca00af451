//! Proptest strategies shared by sinkproof's property tests.

pub mod strategies;

pub use strategies::{
    strategy_audience, strategy_captured_event, strategy_dns_label, strategy_event_kind,
    strategy_event_type, strategy_interleaving, strategy_subject,
};
