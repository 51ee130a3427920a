//! Notification data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::NotificationError;

/// Identity of a stew user (recipient or actor of a notification).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Accept `id` only if it is a UUID, the shape of every account id.
    pub fn parse_uuid(id: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(id)?;
        Ok(Self::new(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What the actor did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
        }
    }
}

/// A notification row, as stored in the `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "notifier_id")]
    pub actor_id: UserId,
    #[serde(rename = "notified_id")]
    pub recipient_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// The post the event concerns. Absent for follows.
    #[serde(rename = "post_id", default)]
    pub subject_post_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

impl NotificationRecord {
    pub fn is_unread(&self) -> bool {
        !self.is_read
    }
}

/// A change-feed message before validation.
///
/// `change_type` is one of `INSERT`, `UPDATE` or `DELETE`. `old_record` only
/// carries the full previous row when the table publishes it; otherwise it
/// holds the primary key alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: serde_json::Value,
}

/// A validated change to one notification row.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationChange {
    Inserted(NotificationRecord),
    Updated {
        record: NotificationRecord,
        /// Read flag before the update, when the feed carries the old row.
        previously_read: Option<bool>,
    },
    Deleted {
        id: String,
        recipient_id: Option<UserId>,
        /// Whether the deleted row was unread, when the feed carries the old row.
        was_unread: Option<bool>,
    },
}

impl NotificationChange {
    /// Recipient of the affected row, if known.
    pub fn recipient_id(&self) -> Option<&UserId> {
        match self {
            NotificationChange::Inserted(record) => Some(&record.recipient_id),
            NotificationChange::Updated { record, .. } => Some(&record.recipient_id),
            NotificationChange::Deleted { recipient_id, .. } => recipient_id.as_ref(),
        }
    }

    pub fn notification_id(&self) -> &str {
        match self {
            NotificationChange::Inserted(record) => &record.id,
            NotificationChange::Updated { record, .. } => &record.id,
            NotificationChange::Deleted { id, .. } => id,
        }
    }
}

impl TryFrom<RawChange> for NotificationChange {
    type Error = NotificationError;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        match raw.change_type.as_str() {
            "INSERT" => Ok(NotificationChange::Inserted(parse_record(raw.record)?)),
            "UPDATE" => {
                let previously_read = raw.old_record.get("is_read").and_then(|v| v.as_bool());
                Ok(NotificationChange::Updated {
                    record: parse_record(raw.record)?,
                    previously_read,
                })
            }
            "DELETE" => {
                let id = raw
                    .old_record
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        NotificationError::MalformedEvent("DELETE without row id".to_string())
                    })?
                    .to_string();
                let recipient_id = raw
                    .old_record
                    .get("notified_id")
                    .and_then(|v| v.as_str())
                    .map(UserId::from);
                let was_unread = raw
                    .old_record
                    .get("is_read")
                    .and_then(|v| v.as_bool())
                    .map(|is_read| !is_read);
                Ok(NotificationChange::Deleted {
                    id,
                    recipient_id,
                    was_unread,
                })
            }
            other => Err(NotificationError::MalformedEvent(format!(
                "unknown change type: {}",
                other
            ))),
        }
    }
}

fn parse_record(value: serde_json::Value) -> Result<NotificationRecord, NotificationError> {
    serde_json::from_value(value).map_err(|e| NotificationError::MalformedEvent(e.to_string()))
}
