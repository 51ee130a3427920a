//! Builders for notification rows and tracker setups

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stew_notifications::notifications::{NotificationKind, NotificationRecord, UserId};
use stew_notifications::tracker::{RetryPolicy, TrackerSettings};
use stew_notifications::NotificationFreshnessTracker;

use super::constants::ACTOR;
use super::store::InMemoryStore;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An unread notification for `recipient` with a fresh id.
pub fn unread(recipient: &UserId) -> NotificationRecord {
    unread_of_kind(recipient, NotificationKind::Like)
}

pub fn unread_of_kind(recipient: &UserId, kind: NotificationKind) -> NotificationRecord {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    NotificationRecord {
        id: format!("notif-{}", id),
        created_at: Utc::now(),
        actor_id: UserId::from(ACTOR),
        recipient_id: recipient.clone(),
        kind,
        subject_post_id: match kind {
            NotificationKind::Follow => None,
            _ => Some(format!("post-{}", id)),
        },
        is_read: false,
    }
}

/// Settings with backoffs short enough for tests.
pub fn fast_settings() -> TrackerSettings {
    TrackerSettings {
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        },
        resync_interval: None,
    }
}

pub fn tracker_with(store: &Arc<InMemoryStore>) -> NotificationFreshnessTracker {
    NotificationFreshnessTracker::new(store.clone(), fast_settings())
}
