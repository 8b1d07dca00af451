//! Assertions over captured events.
//!
//! Build an assertion with [`on_store`], then [`StoreAssertion::check`] it
//! against a [`MatchContext`]. Checks poll the store through a [`Poller`]
//! until the threshold holds, the timeout passes, or the run is cancelled.

pub mod context;
pub mod identity;
pub mod matcher;
pub mod poll;
pub mod predicate;

pub use context::MatchContext;
pub use identity::{OidcUserFromResource, oidc_user_from_resource};
pub use matcher::{EventMatch, Observation, StoreAssertion, StoreMatcher, Threshold, on_store};
pub use poll::{PollConfig, PollOutcome, Poller, Probe, Verdict};
pub use predicate::{
    ContextPredicate, ContextVerdict, EventPredicate, Predicate, any, has_bearer_token, has_extension,
    has_id, has_source, has_type, kind, over_tls,
};
