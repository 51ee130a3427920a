//! Notification store contract

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::NotificationError;
use super::models::{RawChange, UserId};

/// Remote notification table plus its push-change feed.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Count notifications for `recipient` with `is_read = false`.
    async fn count_unread(&self, recipient: &UserId) -> Result<u64, NotificationError>;

    /// Set `is_read = true` on every unread notification of `recipient`.
    /// Idempotent.
    async fn mark_all_read(&self, recipient: &UserId) -> Result<(), NotificationError>;

    /// Open a change feed restricted to rows of `recipient`.
    ///
    /// Resolves once the feed is live: changes committed after this returns
    /// are delivered on the subscription.
    async fn subscribe(&self, recipient: &UserId) -> Result<FeedSubscription, NotificationError>;
}

/// Message delivered on a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// A row changed. Still unvalidated.
    Change(RawChange),
    /// The feed is gone; nothing else will arrive on this subscription.
    Dropped(String),
}

/// Consumer side of a change feed.
///
/// Closing (or dropping) the subscription tells the producer to stop.
#[derive(Debug)]
pub struct FeedSubscription {
    signals: mpsc::Receiver<FeedSignal>,
    closed: CancellationToken,
}

/// Producer side of a change feed.
#[derive(Debug, Clone)]
pub struct FeedSender {
    signals: mpsc::Sender<FeedSignal>,
    closed: CancellationToken,
}

impl FeedSubscription {
    /// Create a connected producer/consumer pair.
    pub fn channel(buffer: usize) -> (FeedSender, FeedSubscription) {
        let (tx, rx) = mpsc::channel(buffer);
        let closed = CancellationToken::new();
        (
            FeedSender {
                signals: tx,
                closed: closed.clone(),
            },
            FeedSubscription {
                signals: rx,
                closed,
            },
        )
    }

    /// Wait for the next signal. `None` means the producer went away.
    pub async fn next(&mut self) -> Option<FeedSignal> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.signals.recv().await
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl FeedSender {
    /// Deliver a signal. Returns false once the subscriber is gone.
    pub async fn send(&self, signal: FeedSignal) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.signals.send(signal).await.is_ok()
    }

    /// Resolves when the subscriber closes or drops its end.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.signals.is_closed()
    }
}
