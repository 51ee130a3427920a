//! Remote notification store: the table's REST endpoint plus its realtime feed.

mod messages;
mod realtime;
mod rest;

pub use messages::{events, PhoenixMessage, PHOENIX_TOPIC};
pub use realtime::RealtimeFeed;
pub use rest::{parse_content_range_total, NotificationsTable};

use async_trait::async_trait;

use crate::config::BackendSettings;
use crate::notifications::{FeedSubscription, NotificationError, NotificationStore, UserId};

/// [`NotificationStore`] backed by the hosted database.
pub struct RemoteNotificationStore {
    table: NotificationsTable,
    feed: RealtimeFeed,
}

impl RemoteNotificationStore {
    pub fn new(settings: &BackendSettings) -> Result<Self, NotificationError> {
        Ok(Self {
            table: NotificationsTable::new(settings)?,
            feed: RealtimeFeed::new(settings),
        })
    }
}

#[async_trait]
impl NotificationStore for RemoteNotificationStore {
    async fn count_unread(&self, recipient: &UserId) -> Result<u64, NotificationError> {
        self.table.count_unread(recipient).await
    }

    async fn mark_all_read(&self, recipient: &UserId) -> Result<(), NotificationError> {
        self.table.mark_all_read(recipient).await
    }

    async fn subscribe(&self, recipient: &UserId) -> Result<FeedSubscription, NotificationError> {
        self.feed.subscribe(recipient).await
    }
}
