//! Badge observers and the per-session provider that owns the tracker.
//!
//! The header bell and the tab-bar heart both render the unread state. They
//! never own a tracker of their own: [`NotificationSession`] builds the one
//! tracker for the signed-in user and hands out observers bound to it.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::notifications::{NotificationError, NotificationStore, UserId};
use crate::tracker::{BadgeState, NotificationFreshnessTracker, TrackerSettings};

/// Where the user currently is, as far as the badges care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveView {
    Notifications,
    #[default]
    Elsewhere,
}

impl ActiveView {
    /// Classify an app route. Only the notifications feed matters here.
    pub fn from_path(path: &str) -> Self {
        if path.trim_end_matches('/') == "/notifications" {
            ActiveView::Notifications
        } else {
            ActiveView::Elsewhere
        }
    }
}

/// What a badge draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeIndicator {
    /// A plain "something is unread" dot.
    Dot,
    /// The number of unread notifications.
    Count(u64),
}

impl fmt::Display for BadgeIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadgeIndicator::Dot => f.write_str("●"),
            BadgeIndicator::Count(count) => write!(f, "({})", count),
        }
    }
}

/// The one place that knows which view is open.
///
/// Shared by the session and every observer it hands out, so a navigation
/// reported through any of them is seen by all.
pub struct Navigator {
    tracker: Arc<NotificationFreshnessTracker>,
    view: Mutex<ActiveView>,
}

impl Navigator {
    pub fn new(tracker: Arc<NotificationFreshnessTracker>) -> Self {
        Self {
            tracker,
            view: Mutex::new(ActiveView::default()),
        }
    }

    pub fn tracker(&self) -> &Arc<NotificationFreshnessTracker> {
        &self.tracker
    }

    pub fn current_view(&self) -> ActiveView {
        *self
            .view
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a navigation. Only transitions reach the tracker.
    pub fn navigate(&self, view: ActiveView) {
        let previous = {
            let mut current = self
                .view
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, view)
        };
        if previous == view {
            return;
        }
        match view {
            ActiveView::Notifications => self.tracker.enter_notifications_view(),
            ActiveView::Elsewhere => self.tracker.leave_notifications_view(),
        }
    }
}

/// Read-only view of the shared unread state.
///
/// Observers render from the tracker and report navigation; they never write
/// the count.
#[async_trait]
pub trait BadgeObserver: Send {
    fn navigator(&self) -> &Arc<Navigator>;

    fn tracker(&self) -> &Arc<NotificationFreshnessTracker> {
        self.navigator().tracker()
    }

    fn receiver(&mut self) -> &mut watch::Receiver<BadgeState>;

    /// Indicator to draw for `state`, or `None` to draw nothing.
    fn indicator(&self, state: BadgeState) -> Option<BadgeIndicator>;

    fn state(&self) -> BadgeState {
        self.tracker().badge()
    }

    fn render(&self) -> Option<BadgeIndicator> {
        self.indicator(self.state())
    }

    fn on_navigate(&self, view: ActiveView) {
        self.navigator().navigate(view);
    }

    /// Wait until the badge changes. Returns `None` once the tracker is gone.
    async fn changed(&mut self) -> Option<Option<BadgeIndicator>> {
        self.receiver().changed().await.ok()?;
        let state = *self.receiver().borrow_and_update();
        Some(self.indicator(state))
    }
}

/// Bell in the top header: a dot whenever anything is unread.
pub struct HeaderBadge {
    navigator: Arc<Navigator>,
    rx: watch::Receiver<BadgeState>,
}

#[async_trait]
impl BadgeObserver for HeaderBadge {
    fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    fn receiver(&mut self) -> &mut watch::Receiver<BadgeState> {
        &mut self.rx
    }

    fn indicator(&self, state: BadgeState) -> Option<BadgeIndicator> {
        state.has_unread().then_some(BadgeIndicator::Dot)
    }
}

/// Heart in the bottom tab bar: the unread count.
pub struct TabBarBadge {
    navigator: Arc<Navigator>,
    rx: watch::Receiver<BadgeState>,
}

#[async_trait]
impl BadgeObserver for TabBarBadge {
    fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    fn receiver(&mut self) -> &mut watch::Receiver<BadgeState> {
        &mut self.rx
    }

    fn indicator(&self, state: BadgeState) -> Option<BadgeIndicator> {
        state
            .has_unread()
            .then_some(BadgeIndicator::Count(state.count))
    }
}

/// Per-session provider of the notification tracker.
///
/// Built once when the client starts and kept for its lifetime; sign-in,
/// sign-out and account switches go through [`on_auth_changed`](Self::on_auth_changed)
/// so the single tracker is re-baselined instead of duplicated.
pub struct NotificationSession {
    navigator: Arc<Navigator>,
}

impl NotificationSession {
    pub fn new(store: Arc<dyn NotificationStore>, settings: TrackerSettings) -> Self {
        let tracker = Arc::new(NotificationFreshnessTracker::new(store, settings));
        Self {
            navigator: Arc::new(Navigator::new(tracker)),
        }
    }

    pub fn tracker(&self) -> &Arc<NotificationFreshnessTracker> {
        self.navigator.tracker()
    }

    pub fn current_view(&self) -> ActiveView {
        self.navigator.current_view()
    }

    /// The signed-in identity changed (sign-in, sign-out, account switch).
    ///
    /// Signing out tears the tracker down and is not an error. If the user is
    /// on the notifications view when the new identity lands, that identity's
    /// notifications are marked read right away.
    pub async fn on_auth_changed(&self, user: Option<UserId>) -> Result<(), NotificationError> {
        let Some(user) = user else {
            info!("Signed out, clearing notification badges");
            self.tracker().teardown();
            return Ok(());
        };

        self.tracker().initialize(Some(user)).await?;
        if self.current_view() == ActiveView::Notifications {
            self.tracker().enter_notifications_view();
        }
        Ok(())
    }

    /// Record a navigation. Only transitions reach the tracker.
    pub fn navigate(&self, view: ActiveView) {
        self.navigator.navigate(view);
    }

    pub fn header_badge(&self) -> HeaderBadge {
        HeaderBadge {
            navigator: Arc::clone(&self.navigator),
            rx: self.tracker().subscribe_badge(),
        }
    }

    pub fn tab_bar_badge(&self) -> TabBarBadge {
        TabBarBadge {
            navigator: Arc::clone(&self.navigator),
            rx: self.tracker().subscribe_badge(),
        }
    }

    /// Stop tracking. Also happens when the session is dropped, even while
    /// observers are still around.
    pub fn close(&self) {
        self.tracker().teardown();
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Identity changes applied one at a time, in submission order, on a
/// background task. Submitting never waits for a baseline.
pub struct AuthChanges {
    session: Arc<NotificationSession>,
    tx: mpsc::UnboundedSender<Option<UserId>>,
    worker: JoinHandle<()>,
}

impl AuthChanges {
    pub fn spawn(session: Arc<NotificationSession>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<UserId>>();
        let worker = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                while let Some(user) = rx.recv().await {
                    if let Err(e) = session.on_auth_changed(user).await {
                        warn!("Failed to start notification tracking: {}", e);
                    }
                }
            }
        });
        Self {
            session,
            tx,
            worker,
        }
    }

    /// Queue a sign-in or account switch.
    pub fn sign_in(&self, user: UserId) {
        let _ = self.tx.send(Some(user));
    }

    /// Stop tracking now, cancelling a sign-in still waiting for its
    /// baseline, and queue the sign-out behind earlier changes.
    pub fn sign_out(&self) {
        self.session.close();
        let _ = self.tx.send(None);
    }
}

impl Drop for AuthChanges {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_from_path() {
        assert_eq!(
            ActiveView::from_path("/notifications"),
            ActiveView::Notifications
        );
        assert_eq!(
            ActiveView::from_path("/notifications/"),
            ActiveView::Notifications
        );
        assert_eq!(ActiveView::from_path("/home"), ActiveView::Elsewhere);
        assert_eq!(
            ActiveView::from_path("/profile/notifications"),
            ActiveView::Elsewhere
        );
    }

    #[test]
    fn test_indicator_display() {
        assert_eq!(BadgeIndicator::Dot.to_string(), "●");
        assert_eq!(BadgeIndicator::Count(4).to_string(), "(4)");
    }
}
