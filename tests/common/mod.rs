//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{alice, tracker_with, unread, InMemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_baseline() {
//!     let store = Arc::new(InMemoryStore::new());
//!     store.insert_silently(unread(&alice()));
//!     let tracker = tracker_with(&store);
//!
//!     tracker.initialize(Some(alice())).await.unwrap();
//!     assert_eq!(tracker.unread_count(), 1);
//! }
//! ```
#![allow(dead_code)]

mod constants;
mod fixtures;
mod store;

pub use constants::*;
pub use fixtures::{fast_settings, tracker_with, unread, unread_of_kind};
pub use store::InMemoryStore;

use std::future::Future;
use std::time::Duration;

use stew_notifications::notifications::UserId;
use stew_notifications::tracker::BadgeState;
use stew_notifications::NotificationFreshnessTracker;
use tokio::sync::watch;

pub fn alice() -> UserId {
    UserId::from(ALICE)
}

pub fn bob() -> UserId {
    UserId::from(BOB)
}

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let polled = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(WAIT, polled).await.is_err() {
        panic!("timed out waiting for {}", what);
    }
}

/// Wait until the tracker shows `count`.
pub async fn wait_for_count(tracker: &NotificationFreshnessTracker, count: u64) {
    let mut rx = tracker.subscribe_badge();
    wait_for_badge(&mut rx, |badge| badge.count == count)
        .await
        .unwrap_or_else(|| {
            panic!(
                "timed out waiting for count {}, tracker shows {}",
                count,
                tracker.unread_count()
            )
        });
}

pub async fn wait_for_badge(
    rx: &mut watch::Receiver<BadgeState>,
    predicate: impl FnMut(&BadgeState) -> bool,
) -> Option<BadgeState> {
    within(rx.wait_for(predicate))
        .await
        .and_then(|result| result.ok().map(|badge| *badge))
}

pub async fn within<F: Future>(future: F) -> Option<F::Output> {
    tokio::time::timeout(WAIT, future).await.ok()
}
