//! Live unread-count tracking for one recipient.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, OptionFuture};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notifications::{
    FeedSignal, FeedSubscription, NotificationChange, NotificationError, NotificationStore,
    RawChange, UserId,
};

use super::counter::{
    BadgeState, BaselineOutcome, ChangeOutcome, SessionEpoch, TrackerState, UnreadCounter,
};
use super::TrackerSettings;

/// State shared between the tracker handle and its background tasks.
struct Shared {
    store: Arc<dyn NotificationStore>,
    settings: TrackerSettings,
    counter: Mutex<UnreadCounter>,
    badge_tx: watch::Sender<BadgeState>,
    /// Woken whenever a mark-read call finishes.
    mark_read_done: Notify,
}

/// Background work owned by the current recipient.
struct ActiveSession {
    epoch: SessionEpoch,
    recipient: UserId,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn stop(self) {
        self.cancel.cancel();
        if let Some(supervisor) = self.supervisor {
            supervisor.abort();
        }
        info!("Stopped tracking unread notifications for {}", self.recipient);
    }
}

enum FeedExit {
    Cancelled,
    Dropped(String),
}

/// Keeps the unread-notification count of one recipient live.
///
/// Construct one per signed-in session and share it (see
/// [`NotificationSession`](crate::badge::NotificationSession)); every badge
/// must observe the same instance.
pub struct NotificationFreshnessTracker {
    shared: Arc<Shared>,
    session: Mutex<Option<ActiveSession>>,
}

impl NotificationFreshnessTracker {
    pub fn new(store: Arc<dyn NotificationStore>, settings: TrackerSettings) -> Self {
        let (badge_tx, _) = watch::channel(BadgeState::default());
        Self {
            shared: Arc::new(Shared {
                store,
                settings,
                counter: Mutex::new(UnreadCounter::new()),
                badge_tx,
                mark_read_done: Notify::new(),
            }),
            session: Mutex::new(None),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking `recipient`.
    ///
    /// Opens the change feed, then takes a baseline count and returns once
    /// that baseline has been applied (or given up on). Re-initializing with
    /// the recipient already being tracked is a no-op; a different recipient
    /// replaces the current session. `None` tears down any session and
    /// fails with [`NotificationError::NotAuthenticated`].
    pub async fn initialize(&self, recipient: Option<UserId>) -> Result<(), NotificationError> {
        let Some(recipient) = recipient else {
            self.teardown();
            debug!("No signed-in user, unread tracking disabled");
            return Err(NotificationError::NotAuthenticated);
        };

        let (epoch, cancel) = {
            let mut session = self.lock_session();
            if session
                .as_ref()
                .is_some_and(|active| active.recipient == recipient)
            {
                return Ok(());
            }
            if let Some(previous) = session.take() {
                previous.stop();
            }
            let epoch = self.shared.update(|counter| counter.begin(recipient.clone()));
            let cancel = CancellationToken::new();
            *session = Some(ActiveSession {
                epoch,
                recipient: recipient.clone(),
                cancel: cancel.clone(),
                supervisor: None,
            });
            (epoch, cancel)
        };
        info!("Tracking unread notifications for {}", recipient);

        // Feed first: the baseline then overwrites whatever it applied meanwhile
        let opened = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            opened = self.shared.store.subscribe(&recipient) => opened,
        };

        let (feed, recount, baseline_done) = match opened {
            Ok(feed) => {
                let (done_tx, done_rx) = oneshot::channel();
                let baseline = self
                    .shared
                    .recount_future(epoch, recipient.clone(), cancel.clone());
                let recount = async move {
                    let applied = baseline.await;
                    let _ = done_tx.send(applied);
                    applied
                }
                .boxed();
                (Some(feed), Some(recount), Some(done_rx))
            }
            Err(err) => {
                warn!(
                    "Failed to subscribe to notifications of {}: {}; counting without live updates",
                    recipient, err
                );
                self.shared.recount(epoch, &recipient, &cancel).await;
                (None, None, None)
            }
        };

        let supervisor = tokio::spawn(Arc::clone(&self.shared).supervise(
            epoch,
            recipient,
            cancel.clone(),
            feed,
            recount,
        ));
        {
            let mut session = self.lock_session();
            match session.as_mut() {
                Some(active) if active.epoch == epoch => active.supervisor = Some(supervisor),
                _ => {
                    cancel.cancel();
                    supervisor.abort();
                    return Ok(());
                }
            }
        }

        if let Some(done) = baseline_done {
            // Errors out if the session is torn down before the baseline lands
            let _ = done.await;
        }
        Ok(())
    }

    /// Close the feed and forget the recipient. Safe to call repeatedly.
    pub fn teardown(&self) {
        let mut session = self.lock_session();
        if let Some(previous) = session.take() {
            previous.stop();
        }
        self.shared.update(|counter| {
            if counter.recipient().is_some() {
                counter.reset();
            }
        });
    }

    /// Apply one change to the current session.
    pub fn on_push_event(&self, change: &NotificationChange) -> ChangeOutcome {
        let outcome = self.shared.update(|counter| {
            let epoch = counter.epoch();
            counter.apply_change(epoch, change)
        });
        debug!(
            "Notification {} change: {:?}",
            change.notification_id(),
            outcome
        );
        outcome
    }

    /// The user opened the notifications view.
    ///
    /// The count drops to zero immediately; marking the rows read on the
    /// server happens in the background and its failure is only logged.
    pub fn enter_notifications_view(&self) {
        let entered = self.shared.update(|counter| {
            let epoch = counter.epoch();
            counter.enter_view().map(|recipient| (epoch, recipient))
        });
        let Some((epoch, recipient)) = entered else {
            return;
        };
        debug!("Notifications view opened by {}, marking all read", recipient);

        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { shared.mark_all_read(epoch, recipient).await });
            }
            Err(_) => {
                warn!(
                    "No async runtime, notifications of {} stay unread on the server",
                    recipient
                );
                self.shared.settle_mark_read(epoch);
            }
        }
    }

    /// The user left the notifications view. Counting resumes from zero.
    pub fn leave_notifications_view(&self) {
        if self.shared.update(|counter| counter.leave_view()) {
            debug!("Notifications view closed");
        }
    }

    /// Recount from the store right now. Returns true if a baseline landed.
    pub async fn resync(&self) -> bool {
        let current = self.lock_session().as_ref().map(|active| {
            (
                active.epoch,
                active.recipient.clone(),
                active.cancel.clone(),
            )
        });
        match current {
            Some((epoch, recipient, cancel)) => {
                self.shared.recount(epoch, &recipient, &cancel).await
            }
            None => false,
        }
    }

    pub fn unread_count(&self) -> u64 {
        self.shared.lock_counter().count()
    }

    pub fn state(&self) -> TrackerState {
        self.shared.lock_counter().state().clone()
    }

    pub fn badge(&self) -> BadgeState {
        self.shared.lock_counter().badge()
    }

    /// Receiver that is notified whenever the rendered badge changes.
    pub fn subscribe_badge(&self) -> watch::Receiver<BadgeState> {
        self.shared.badge_tx.subscribe()
    }
}

impl Drop for NotificationFreshnessTracker {
    fn drop(&mut self) {
        if let Some(active) = self.lock_session().take() {
            active.cancel.cancel();
        }
    }
}

impl Shared {
    fn lock_counter(&self) -> MutexGuard<'_, UnreadCounter> {
        self.counter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate the counter and publish the resulting badge.
    fn update<R>(&self, f: impl FnOnce(&mut UnreadCounter) -> R) -> R {
        let mut counter = self.lock_counter();
        let result = f(&mut counter);
        let badge = counter.badge();
        self.badge_tx.send_if_modified(|current| {
            if *current == badge {
                return false;
            }
            *current = badge;
            true
        });
        result
    }

    fn apply_raw(&self, epoch: SessionEpoch, raw: RawChange) {
        let change = match NotificationChange::try_from(raw) {
            Ok(change) => change,
            Err(err) => {
                warn!("Dropping feed message: {}", err);
                return;
            }
        };
        let outcome = self.update(|counter| counter.apply_change(epoch, &change));
        debug!(
            "Notification {} change: {:?}",
            change.notification_id(),
            outcome
        );
    }

    /// Sleep for the backoff of `attempt`. Returns false if cancelled first.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.settings.retry.backoff(attempt);
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Wait until no mark-read of `epoch` is in flight. Returns false if
    /// cancelled first.
    async fn mark_reads_settled(&self, epoch: SessionEpoch, cancel: &CancellationToken) -> bool {
        loop {
            let settled = self.mark_read_done.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            {
                let counter = self.lock_counter();
                if counter.epoch() != epoch || counter.pending_mark_reads() == 0 {
                    return true;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = &mut settled => {}
            }
        }
    }

    /// Take a full baseline count and overwrite the counter with it.
    ///
    /// Transient failures are retried with backoff; while retrying, the last
    /// known count stays displayed. A count that raced with a visit to the
    /// notifications view is re-queried once the mark-read has finished.
    /// Returns true if the baseline was applied.
    async fn recount(
        &self,
        epoch: SessionEpoch,
        recipient: &UserId,
        cancel: &CancellationToken,
    ) -> bool {
        let mut attempt = 0;
        loop {
            let ticket = self.lock_counter().baseline_ticket(epoch);
            let result = tokio::select! {
                _ = cancel.cancelled() => return false,
                result = self.store.count_unread(recipient) => result,
            };

            match result {
                Ok(server_unread) => {
                    let outcome = self
                        .update(|counter| counter.apply_baseline(ticket, recipient, server_unread));
                    match outcome {
                        BaselineOutcome::Applied { previous, current } => debug!(
                            "Unread baseline for {}: {} -> {}",
                            recipient, previous, current
                        ),
                        BaselineOutcome::Pinned { server_unread } => debug!(
                            "Unread baseline for {} is {}, badge pinned while viewing",
                            recipient, server_unread
                        ),
                        BaselineOutcome::Superseded => {
                            debug!(
                                "Unread baseline for {} predates a mark-read, querying again",
                                recipient
                            );
                            if !self.mark_reads_settled(epoch, cancel).await {
                                return false;
                            }
                            continue;
                        }
                        BaselineOutcome::Stale => {
                            debug!("Discarding stale unread baseline for {}", recipient)
                        }
                    }
                    return outcome != BaselineOutcome::Stale;
                }
                Err(err) if self.settings.retry.should_retry(&err, attempt) => {
                    warn!(
                        "Unread count for {} failed (attempt {}): {}",
                        recipient,
                        attempt + 1,
                        err
                    );
                    if !self.backoff(attempt, cancel).await {
                        return false;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        "Giving up on unread count for {}, keeping last known value: {}",
                        recipient, err
                    );
                    return false;
                }
            }
        }
    }

    fn recount_future(
        self: &Arc<Self>,
        epoch: SessionEpoch,
        recipient: UserId,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, bool> {
        let shared = Arc::clone(self);
        async move { shared.recount(epoch, &recipient, &cancel).await }.boxed()
    }

    async fn mark_all_read(&self, epoch: SessionEpoch, recipient: UserId) {
        match self.store.mark_all_read(&recipient).await {
            Ok(()) => debug!("Marked notifications of {} as read", recipient),
            Err(err) => warn!(
                "Failed to mark notifications of {} as read: {}",
                recipient, err
            ),
        }
        self.settle_mark_read(epoch);
    }

    fn settle_mark_read(&self, epoch: SessionEpoch) {
        self.update(|counter| counter.mark_read_settled(epoch));
        self.mark_read_done.notify_waiters();
    }

    /// Keep a feed alive for the session: pump it, and on every drop
    /// resubscribe with backoff followed by a full recount.
    async fn supervise(
        self: Arc<Self>,
        epoch: SessionEpoch,
        recipient: UserId,
        cancel: CancellationToken,
        mut feed: Option<FeedSubscription>,
        mut recount: Option<BoxFuture<'static, bool>>,
    ) {
        let mut attempt: u32 = 0;
        loop {
            let current = match feed.take() {
                Some(current) => current,
                None => {
                    let opened = tokio::select! {
                        _ = cancel.cancelled() => return,
                        opened = self.store.subscribe(&recipient) => opened,
                    };
                    match opened {
                        Ok(current) => {
                            info!(
                                "Notification feed for {} re-established, recounting",
                                recipient
                            );
                            attempt = 0;
                            recount = Some(self.recount_future(
                                epoch,
                                recipient.clone(),
                                cancel.clone(),
                            ));
                            current
                        }
                        Err(err) => {
                            warn!(
                                "Failed to subscribe to notifications of {}: {}",
                                recipient, err
                            );
                            if !self.backoff(attempt, &cancel).await {
                                return;
                            }
                            attempt = attempt.saturating_add(1);
                            continue;
                        }
                    }
                }
            };

            match self
                .pump(epoch, &recipient, &cancel, current, recount.take())
                .await
            {
                FeedExit::Cancelled => return,
                FeedExit::Dropped(reason) => {
                    warn!(
                        "{}, reconnecting",
                        NotificationError::SubscriptionDropped(reason)
                    );
                    if !self.backoff(attempt, &cancel).await {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Apply feed changes until the feed drops or the session is cancelled.
    /// A pending recount runs concurrently and overwrites the counter when
    /// it lands.
    async fn pump(
        self: &Arc<Self>,
        epoch: SessionEpoch,
        recipient: &UserId,
        cancel: &CancellationToken,
        mut feed: FeedSubscription,
        mut recount: Option<BoxFuture<'static, bool>>,
    ) -> FeedExit {
        let mut resync = self.settings.resync_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    feed.close();
                    return FeedExit::Cancelled;
                }
                Some(_) = OptionFuture::from(recount.as_mut()) => {
                    recount = None;
                }
                Some(_) = OptionFuture::from(resync.as_mut().map(|ticker| ticker.tick())), if recount.is_none() => {
                    debug!("Periodic unread resync for {}", recipient);
                    recount = Some(self.recount_future(epoch, recipient.clone(), cancel.clone()));
                }
                signal = feed.next() => match signal {
                    Some(FeedSignal::Change(raw)) => self.apply_raw(epoch, raw),
                    Some(FeedSignal::Dropped(reason)) => return FeedExit::Dropped(reason),
                    None => return FeedExit::Dropped("feed closed".to_string()),
                },
            }
        }
    }
}
