//! Realtime channel message types.
//!
//! The realtime socket speaks the Phoenix channel protocol: every frame is a
//! JSON envelope of topic, event, payload and a client-chosen ref.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::notifications::{RawChange, UserId};

/// Phoenix channel envelope, both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn new(
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
        msg_ref: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: Some(msg_ref.into()),
        }
    }

    /// Join request subscribing to row changes of `recipient`'s notifications.
    pub fn join(topic: &str, recipient: &UserId, access_token: &str, msg_ref: &str) -> Self {
        Self::new(
            topic,
            events::JOIN,
            json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": "notifications",
                        "filter": format!("notified_id=eq.{}", recipient),
                    }],
                },
                "access_token": access_token,
            }),
            msg_ref,
        )
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self::new(PHOENIX_TOPIC, events::HEARTBEAT, json!({}), msg_ref)
    }

    pub fn leave(topic: &str, msg_ref: &str) -> Self {
        Self::new(topic, events::LEAVE, json!({}), msg_ref)
    }

    /// Status of a `phx_reply`, e.g. `"ok"` or `"error"`.
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(|status| status.as_str())
    }

    /// Human-readable reason carried by an error reply.
    pub fn reply_reason(&self) -> String {
        self.payload
            .get("response")
            .map(|response| {
                response
                    .get("reason")
                    .and_then(|reason| reason.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| response.to_string())
            })
            .unwrap_or_else(|| "no reason given".to_string())
    }

    /// Whether this is the server's reply to the message sent on `topic`
    /// with `msg_ref`.
    pub fn is_reply_to(&self, topic: &str, msg_ref: &str) -> bool {
        self.event == events::REPLY
            && self.topic == topic
            && self.msg_ref.as_deref() == Some(msg_ref)
    }

    /// Extract the row change carried by a `postgres_changes` message.
    pub fn postgres_change(&self) -> Option<Result<RawChange, serde_json::Error>> {
        if self.event != events::POSTGRES_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?.clone();
        Some(serde_json::from_value(data))
    }
}

/// Topic used for socket-level messages such as heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Channel event names.
pub mod events {
    /// Join a channel (client -> server).
    pub const JOIN: &str = "phx_join";
    /// Leave a channel (client -> server).
    pub const LEAVE: &str = "phx_leave";
    /// Reply to a client message (server -> client).
    pub const REPLY: &str = "phx_reply";
    /// Channel crashed on the server (server -> client).
    pub const ERROR: &str = "phx_error";
    /// Channel closed by the server (server -> client).
    pub const CLOSE: &str = "phx_close";
    /// Keepalive on the `phoenix` topic (client -> server).
    pub const HEARTBEAT: &str = "heartbeat";
    /// Row change delivered for a subscribed table (server -> client).
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    /// Informational system message (server -> client).
    pub const SYSTEM: &str = "system";
}
