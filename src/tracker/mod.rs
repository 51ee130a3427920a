//! Unread notification tracking
//!
//! [`NotificationFreshnessTracker`] keeps one recipient's unread count live:
//! it takes a baseline from the store, follows the change feed incrementally
//! and recounts from scratch whenever the feed had to be re-established.

mod counter;
mod freshness;
mod retry_policy;

use std::time::Duration;

pub use counter::{
    BadgeState, BaselineOutcome, BaselineTicket, ChangeOutcome, IgnoreReason, SessionEpoch,
    TrackerState, UnreadCounter,
};
pub use freshness::NotificationFreshnessTracker;
pub use retry_policy::RetryPolicy;

/// Tuning for a tracker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerSettings {
    /// Backoff for baseline retries and feed reconnects.
    pub retry: RetryPolicy,
    /// Recount on this cadence while the feed is healthy. `None` disables it.
    pub resync_interval: Option<Duration>,
}
