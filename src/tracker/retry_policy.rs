//! Retry policy for store calls and feed reconnects.
//!
//! Implements exponential backoff with configurable parameters.

use std::time::Duration;

use crate::config::ReconnectSettings;
use crate::notifications::NotificationError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of baseline retries before giving up on one recount.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(settings: &ReconnectSettings) -> Self {
        Self {
            max_retries: settings.max_baseline_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    ///
    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Check if a failed call should be retried given the current retry count.
    ///
    /// Returns true if:
    /// - The error is transient (e.g., not NotAuthenticated)
    /// - The retry count is less than max_retries
    pub fn should_retry(&self, error: &NotificationError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&ReconnectSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
        }
    }

    #[test]
    fn test_default() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries, 8);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_new_from_settings() {
        let settings = ReconnectSettings {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_multiplier: 3.0,
            max_baseline_retries: 2,
        };
        let policy = RetryPolicy::new(&settings);

        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_millis(1000));
        assert_eq!(policy.backoff_multiplier, 3.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = policy(500, 30_000, 2.0);

        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_capping() {
        let policy = policy(500, 3000, 2.0);

        // 500 * 2^2 = 2000 (under cap)
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        // 500 * 2^3 = 4000 -> capped
        assert_eq!(policy.backoff(3), Duration::from_millis(3000));
        // huge attempt counts stay at the cap
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(3000));
    }

    #[test]
    fn test_multiplier_of_one() {
        let policy = policy(250, 10_000, 1.0);

        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(7), Duration::from_millis(250));
    }

    #[test]
    fn test_should_retry_transient_errors() {
        let policy = policy(10, 100, 2.0);
        let unavailable = NotificationError::BackendUnavailable("HTTP 503".into());
        let dropped = NotificationError::SubscriptionDropped("socket closed".into());

        assert!(policy.should_retry(&unavailable, 0));
        assert!(policy.should_retry(&dropped, 4));
        assert!(!policy.should_retry(&unavailable, 5));
        assert!(!policy.should_retry(&unavailable, 50));
    }

    #[test]
    fn test_should_retry_never_for_auth_errors() {
        let policy = policy(10, 100, 2.0);

        assert!(!policy.should_retry(&NotificationError::NotAuthenticated, 0));
    }
}
