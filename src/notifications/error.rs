use thiserror::Error;

/// Errors surfaced by the notification store and the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Subscription dropped: {0}")]
    SubscriptionDropped(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

impl NotificationError {
    /// Returns true if the failure is transient and the call may be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NotificationError::BackendUnavailable(_) | NotificationError::SubscriptionDropped(_)
        )
    }
}
