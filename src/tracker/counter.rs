//! Unread counter state machine.
//!
//! Pure, synchronous bookkeeping for one tracker. Every input that can arrive
//! late (baseline counts, feed changes) carries the [`SessionEpoch`] it was
//! issued under and is dropped when that epoch is no longer current.

use crate::notifications::{NotificationChange, UserId};

/// Generation number of a tracking session. Bumped on every identity change
/// and every teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionEpoch(u64);

impl SessionEpoch {
    fn next(self) -> Self {
        SessionEpoch(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackerState {
    #[default]
    Uninitialized,
    Active(UserId),
    ViewingNotifications(UserId),
}

impl TrackerState {
    pub fn recipient(&self) -> Option<&UserId> {
        match self {
            TrackerState::Uninitialized => None,
            TrackerState::Active(id) | TrackerState::ViewingNotifications(id) => Some(id),
        }
    }

    pub fn is_viewing(&self) -> bool {
        matches!(self, TrackerState::ViewingNotifications(_))
    }
}

/// What observers render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BadgeState {
    pub count: u64,
    pub viewing: bool,
}

impl BadgeState {
    pub fn has_unread(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    StaleEpoch,
    ForeignRecipient,
    Viewing,
    AlreadyRead,
    NotUnread,
    UnknownPriorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Incremented,
    Decremented,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineOutcome {
    Applied { previous: u64, current: u64 },
    /// The notifications view is open; the count stays pinned at zero.
    Pinned { server_unread: u64 },
    /// The view was opened after the query went out, or a mark-read was
    /// still in flight. The server count may include rows since marked read.
    Superseded,
    Stale,
}

/// Taken when a baseline query is issued and handed back with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineTicket {
    epoch: SessionEpoch,
    visits: u64,
    marks_settled: bool,
}

impl BaselineTicket {
    pub fn epoch(&self) -> SessionEpoch {
        self.epoch
    }
}

#[derive(Debug, Default)]
pub struct UnreadCounter {
    state: TrackerState,
    count: u64,
    epoch: SessionEpoch,
    visits: u64,
    pending_mark_reads: u32,
}

impl UnreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.epoch
    }

    pub fn recipient(&self) -> Option<&UserId> {
        self.state.recipient()
    }

    pub fn is_viewing(&self) -> bool {
        self.state.is_viewing()
    }

    pub fn badge(&self) -> BadgeState {
        BadgeState {
            count: self.count,
            viewing: self.is_viewing(),
        }
    }

    /// Start tracking `recipient`. The count restarts at zero until a
    /// baseline lands.
    pub fn begin(&mut self, recipient: UserId) -> SessionEpoch {
        self.epoch = self.epoch.next();
        self.state = TrackerState::Active(recipient);
        self.count = 0;
        self.pending_mark_reads = 0;
        self.epoch
    }

    /// Forget the current recipient.
    pub fn reset(&mut self) {
        self.epoch = self.epoch.next();
        self.state = TrackerState::Uninitialized;
        self.count = 0;
        self.pending_mark_reads = 0;
    }

    pub fn is_current(&self, epoch: SessionEpoch, recipient: &UserId) -> bool {
        self.epoch == epoch && self.recipient() == Some(recipient)
    }

    /// Mark-read calls started under the current epoch that have not
    /// finished yet.
    pub fn pending_mark_reads(&self) -> u32 {
        self.pending_mark_reads
    }

    /// Record the moment a baseline query is sent.
    pub fn baseline_ticket(&self, epoch: SessionEpoch) -> BaselineTicket {
        BaselineTicket {
            epoch,
            visits: self.visits,
            marks_settled: self.pending_mark_reads == 0,
        }
    }

    /// Overwrite the count with an authoritative server count.
    pub fn apply_baseline(
        &mut self,
        ticket: BaselineTicket,
        recipient: &UserId,
        server_unread: u64,
    ) -> BaselineOutcome {
        if !self.is_current(ticket.epoch, recipient) {
            return BaselineOutcome::Stale;
        }
        if self.is_viewing() {
            return BaselineOutcome::Pinned { server_unread };
        }
        if ticket.visits != self.visits || !ticket.marks_settled {
            return BaselineOutcome::Superseded;
        }
        let previous = self.count;
        self.count = server_unread;
        BaselineOutcome::Applied {
            previous,
            current: server_unread,
        }
    }

    /// Apply one feed change incrementally.
    pub fn apply_change(
        &mut self,
        epoch: SessionEpoch,
        change: &NotificationChange,
    ) -> ChangeOutcome {
        let Some(recipient) = self.recipient() else {
            return ChangeOutcome::Ignored(IgnoreReason::StaleEpoch);
        };
        if self.epoch != epoch {
            return ChangeOutcome::Ignored(IgnoreReason::StaleEpoch);
        }
        // Deletes may arrive with the primary key only
        match change.recipient_id() {
            Some(id) if id != recipient => {
                return ChangeOutcome::Ignored(IgnoreReason::ForeignRecipient)
            }
            _ => {}
        }

        let outcome = match change {
            NotificationChange::Inserted(record) if record.is_unread() => {
                ChangeOutcome::Incremented
            }
            NotificationChange::Inserted(_) => ChangeOutcome::Ignored(IgnoreReason::NotUnread),
            NotificationChange::Updated {
                previously_read: Some(true),
                ..
            } => ChangeOutcome::Ignored(IgnoreReason::AlreadyRead),
            NotificationChange::Updated { record, .. } if record.is_read => {
                ChangeOutcome::Decremented
            }
            NotificationChange::Updated { .. } => ChangeOutcome::Ignored(IgnoreReason::NotUnread),
            NotificationChange::Deleted {
                recipient_id: Some(_),
                was_unread: Some(true),
                ..
            } => ChangeOutcome::Decremented,
            NotificationChange::Deleted {
                was_unread: Some(false),
                ..
            } => ChangeOutcome::Ignored(IgnoreReason::NotUnread),
            NotificationChange::Deleted { .. } => {
                ChangeOutcome::Ignored(IgnoreReason::UnknownPriorState)
            }
        };

        match outcome {
            ChangeOutcome::Incremented | ChangeOutcome::Decremented if self.is_viewing() => {
                ChangeOutcome::Ignored(IgnoreReason::Viewing)
            }
            ChangeOutcome::Incremented => {
                self.count = self.count.saturating_add(1);
                outcome
            }
            ChangeOutcome::Decremented => {
                self.count = self.count.saturating_sub(1);
                outcome
            }
            ChangeOutcome::Ignored(_) => outcome,
        }
    }

    /// Open the notifications view: zero the count.
    ///
    /// Returns the recipient to mark read, or `None` when there is nothing to
    /// do (no recipient, or the view is already open).
    pub fn enter_view(&mut self) -> Option<UserId> {
        match &self.state {
            TrackerState::Active(recipient) => {
                let recipient = recipient.clone();
                self.state = TrackerState::ViewingNotifications(recipient.clone());
                self.count = 0;
                self.visits = self.visits.wrapping_add(1);
                self.pending_mark_reads += 1;
                Some(recipient)
            }
            TrackerState::ViewingNotifications(_) | TrackerState::Uninitialized => None,
        }
    }

    /// A mark-read started by [`enter_view`](Self::enter_view) has finished,
    /// successfully or not. Returns false for a call from an older epoch.
    pub fn mark_read_settled(&mut self, epoch: SessionEpoch) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.pending_mark_reads = self.pending_mark_reads.saturating_sub(1);
        true
    }

    /// Close the notifications view. Returns true if the view was open.
    pub fn leave_view(&mut self) -> bool {
        match &self.state {
            TrackerState::ViewingNotifications(recipient) => {
                self.state = TrackerState::Active(recipient.clone());
                true
            }
            TrackerState::Active(_) | TrackerState::Uninitialized => false,
        }
    }
}
