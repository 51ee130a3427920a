//! Notification records, the change feed model and the store contract

mod error;
mod models;
mod store;

pub use error::NotificationError;
pub use models::{NotificationChange, NotificationKind, NotificationRecord, RawChange, UserId};
pub use store::{FeedSender, FeedSignal, FeedSubscription, NotificationStore};

#[cfg(feature = "mock")]
pub use store::MockNotificationStore;
