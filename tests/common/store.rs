//! In-memory notification store with a controllable change feed

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use stew_notifications::notifications::{
    FeedSender, FeedSignal, FeedSubscription, NotificationError, NotificationRecord,
    NotificationStore, RawChange, UserId,
};
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    rows: Vec<NotificationRecord>,
    feeds: Vec<(UserId, FeedSender)>,
    held_counts: HashSet<UserId>,
    hold_mark_reads: bool,
    count_failures: u32,
    subscribe_failures: u32,
    mark_read_failures: u32,
    count_calls: u32,
    subscribe_calls: u32,
    mark_read_calls: u32,
}

/// Stands in for the hosted notifications table and its realtime feed.
///
/// Writes made through [`insert`](Self::insert) and friends behave like rows
/// committed by other users: they land in the table and are pushed to every
/// live feed of the row's recipient.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    released: Notify,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn feeds_of(&self, recipient: &UserId) -> Vec<FeedSender> {
        let mut inner = self.lock();
        inner.feeds.retain(|(_, sender)| !sender.is_closed());
        inner
            .feeds
            .iter()
            .filter(|(owner, _)| owner == recipient)
            .map(|(_, sender)| sender.clone())
            .collect()
    }

    async fn broadcast(&self, recipient: &UserId, signal: FeedSignal) {
        for sender in self.feeds_of(recipient) {
            sender.send(signal.clone()).await;
        }
    }

    /// Commit a row and push the INSERT.
    pub async fn insert(&self, record: NotificationRecord) {
        let recipient = record.recipient_id.clone();
        let change = RawChange {
            change_type: "INSERT".to_string(),
            record: serde_json::to_value(&record).unwrap(),
            old_record: json!({}),
        };
        self.lock().rows.push(record);
        self.broadcast(&recipient, FeedSignal::Change(change)).await;
    }

    /// Commit a row without telling any feed, as if it landed while the feed
    /// was down.
    pub fn insert_silently(&self, record: NotificationRecord) {
        self.lock().rows.push(record);
    }

    /// Flip one row to read and push the UPDATE.
    pub async fn mark_read(&self, id: &str) {
        let updated = {
            let mut inner = self.lock();
            inner.rows.iter_mut().find(|row| row.id == id).map(|row| {
                row.is_read = true;
                row.clone()
            })
        };
        if let Some(record) = updated {
            self.push_update(&record).await;
        }
    }

    async fn push_update(&self, record: &NotificationRecord) {
        let change = RawChange {
            change_type: "UPDATE".to_string(),
            record: serde_json::to_value(record).unwrap(),
            old_record: json!({ "id": record.id }),
        };
        self.broadcast(&record.recipient_id, FeedSignal::Change(change))
            .await;
    }

    /// Delete a row and push the DELETE with its full old row.
    pub async fn delete(&self, id: &str) {
        let removed = {
            let mut inner = self.lock();
            let position = inner.rows.iter().position(|row| row.id == id);
            position.map(|index| inner.rows.remove(index))
        };
        if let Some(record) = removed {
            let change = RawChange {
                change_type: "DELETE".to_string(),
                record: json!({}),
                old_record: serde_json::to_value(&record).unwrap(),
            };
            self.broadcast(&record.recipient_id, FeedSignal::Change(change))
                .await;
        }
    }

    /// Push an arbitrary message on the recipient's feeds.
    pub async fn push_raw(&self, recipient: &UserId, change: RawChange) {
        self.broadcast(recipient, FeedSignal::Change(change)).await;
    }

    /// Kill every live feed.
    pub async fn drop_feeds(&self, reason: &str) {
        let feeds: Vec<FeedSender> = {
            let mut inner = self.lock();
            inner.feeds.drain(..).map(|(_, sender)| sender).collect()
        };
        for sender in feeds {
            sender.send(FeedSignal::Dropped(reason.to_string())).await;
        }
    }

    pub fn live_feeds(&self, recipient: &UserId) -> usize {
        self.feeds_of(recipient).len()
    }

    pub fn unread_rows(&self, recipient: &UserId) -> u64 {
        self.lock()
            .rows
            .iter()
            .filter(|row| &row.recipient_id == recipient && !row.is_read)
            .count() as u64
    }

    /// Make count queries for `recipient` block until released. The answer
    /// is still the count at the time the query arrived.
    pub fn hold_counts(&self, recipient: &UserId) {
        self.lock().held_counts.insert(recipient.clone());
    }

    pub fn release_counts(&self, recipient: &UserId) {
        self.lock().held_counts.remove(recipient);
        self.released.notify_waiters();
    }

    /// Make mark-read calls block until released.
    pub fn hold_mark_reads(&self) {
        self.lock().hold_mark_reads = true;
    }

    pub fn release_mark_reads(&self) {
        self.lock().hold_mark_reads = false;
        self.released.notify_waiters();
    }

    pub fn fail_next_counts(&self, times: u32) {
        self.lock().count_failures = times;
    }

    pub fn fail_next_subscribes(&self, times: u32) {
        self.lock().subscribe_failures = times;
    }

    pub fn fail_next_mark_reads(&self, times: u32) {
        self.lock().mark_read_failures = times;
    }

    pub fn count_calls(&self) -> u32 {
        self.lock().count_calls
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.lock().subscribe_calls
    }

    pub fn mark_read_calls(&self) -> u32 {
        self.lock().mark_read_calls
    }

    async fn wait_while(&self, held: impl Fn(&Inner) -> bool) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !held(&self.lock()) {
                return;
            }
            released.await;
        }
    }
}

fn take_failure(remaining: &mut u32) -> bool {
    if *remaining == 0 {
        return false;
    }
    *remaining -= 1;
    true
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn count_unread(&self, recipient: &UserId) -> Result<u64, NotificationError> {
        let fail = {
            let mut inner = self.lock();
            inner.count_calls += 1;
            take_failure(&mut inner.count_failures)
        };
        // Counted when the query reaches the table; a held query answers late
        // with what the table looked like back then
        let unread = self.unread_rows(recipient);
        self.wait_while(|inner| inner.held_counts.contains(recipient))
            .await;
        if fail {
            return Err(NotificationError::BackendUnavailable(
                "injected count failure".to_string(),
            ));
        }
        Ok(unread)
    }

    async fn mark_all_read(&self, recipient: &UserId) -> Result<(), NotificationError> {
        self.wait_while(|inner| inner.hold_mark_reads).await;
        let updated: Vec<NotificationRecord> = {
            let mut inner = self.lock();
            inner.mark_read_calls += 1;
            if take_failure(&mut inner.mark_read_failures) {
                return Err(NotificationError::BackendUnavailable(
                    "injected mark-read failure".to_string(),
                ));
            }
            inner
                .rows
                .iter_mut()
                .filter(|row| &row.recipient_id == recipient && !row.is_read)
                .map(|row| {
                    row.is_read = true;
                    row.clone()
                })
                .collect()
        };
        for record in &updated {
            self.push_update(record).await;
        }
        Ok(())
    }

    async fn subscribe(&self, recipient: &UserId) -> Result<FeedSubscription, NotificationError> {
        let mut inner = self.lock();
        inner.subscribe_calls += 1;
        if take_failure(&mut inner.subscribe_failures) {
            return Err(NotificationError::BackendUnavailable(
                "injected subscribe failure".to_string(),
            ));
        }
        let (sender, subscription) = FeedSubscription::channel(64);
        inner.feeds.push((recipient.clone(), sender));
        Ok(subscription)
    }
}
