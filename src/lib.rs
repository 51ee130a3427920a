//! Stew notifications client library
//!
//! Keeps the unread-notification badge of the stew client live and consistent
//! across every place that renders it.

pub mod backend;
pub mod badge;
pub mod config;
pub mod notifications;
pub mod tracker;

// Re-export commonly used types for convenience
pub use badge::{
    ActiveView, AuthChanges, BadgeIndicator, BadgeObserver, HeaderBadge, Navigator,
    NotificationSession, TabBarBadge,
};
pub use notifications::{
    NotificationChange, NotificationError, NotificationKind, NotificationRecord, NotificationStore,
    UserId,
};
pub use tracker::{BadgeState, NotificationFreshnessTracker, TrackerSettings, TrackerState};
