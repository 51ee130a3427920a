//! Realtime change feed over the Phoenix channel websocket.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{events, PhoenixMessage, PHOENIX_TOPIC};
use crate::config::BackendSettings;
use crate::notifications::{FeedSender, FeedSignal, FeedSubscription, NotificationError, UserId};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWrite = SplitSink<Socket, Message>;
type SocketRead = SplitStream<Socket>;

const JOIN_REF: &str = "1";
const FEED_BUFFER: usize = 64;

/// What an inbound channel message means for the feed.
#[derive(Debug, PartialEq)]
enum Inbound {
    Signal(FeedSignal),
    Malformed(String),
    Ignore,
}

/// Opens realtime subscriptions on the notifications table.
pub struct RealtimeFeed {
    socket_url: String,
    access_token: String,
    heartbeat_interval: Duration,
    join_timeout: Duration,
}

impl RealtimeFeed {
    pub fn new(settings: &BackendSettings) -> Self {
        Self {
            socket_url: socket_url(&settings.base_url, &settings.api_key),
            access_token: settings.bearer_token().to_string(),
            heartbeat_interval: settings.heartbeat_interval,
            join_timeout: settings.request_timeout,
        }
    }

    /// Connect, join a fresh channel filtered to `recipient`, and wait for
    /// the server to confirm the join before handing out the subscription.
    pub async fn subscribe(&self, recipient: &UserId) -> Result<FeedSubscription, NotificationError> {
        let (ws_stream, _) = connect_async(&self.socket_url)
            .await
            .map_err(|e| NotificationError::BackendUnavailable(format!("websocket: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let topic = format!("realtime:notifications:{}", Uuid::new_v4());
        let join = PhoenixMessage::join(&topic, recipient, &self.access_token, JOIN_REF);
        send(&mut write, &join)
            .await
            .map_err(NotificationError::BackendUnavailable)?;

        match timeout(self.join_timeout, await_join_reply(&mut read, &topic)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(NotificationError::BackendUnavailable(
                    "timed out joining notification channel".to_string(),
                ))
            }
        }
        info!("Joined notification channel {} for {}", topic, recipient);

        let (sender, subscription) = FeedSubscription::channel(FEED_BUFFER);
        tokio::spawn(run_channel(
            write,
            read,
            sender,
            topic,
            self.heartbeat_interval,
        ));
        Ok(subscription)
    }
}

/// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
fn socket_url(base_url: &str, api_key: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base,
        urlencoding::encode(api_key)
    )
}

async fn send(write: &mut SocketWrite, msg: &PhoenixMessage) -> Result<(), String> {
    let text = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

async fn await_join_reply(read: &mut SocketRead, topic: &str) -> Result<(), NotificationError> {
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(NotificationError::BackendUnavailable(e.to_string())),
        };
        let Ok(msg) = serde_json::from_str::<PhoenixMessage>(&text) else {
            continue;
        };
        if !msg.is_reply_to(topic, JOIN_REF) {
            continue;
        }
        return match msg.reply_status() {
            Some("ok") => Ok(()),
            _ => Err(NotificationError::SubscriptionDropped(format!(
                "join rejected: {}",
                msg.reply_reason()
            ))),
        };
    }
    Err(NotificationError::BackendUnavailable(
        "socket closed before join reply".to_string(),
    ))
}

fn classify(msg: &PhoenixMessage, topic: &str) -> Inbound {
    if msg.topic != topic {
        return Inbound::Ignore;
    }
    match msg.event.as_str() {
        events::POSTGRES_CHANGES => match msg.postgres_change() {
            Some(Ok(change)) => Inbound::Signal(FeedSignal::Change(change)),
            Some(Err(e)) => Inbound::Malformed(e.to_string()),
            None => Inbound::Ignore,
        },
        events::ERROR => Inbound::Signal(FeedSignal::Dropped("channel error".to_string())),
        events::CLOSE => Inbound::Signal(FeedSignal::Dropped("channel closed".to_string())),
        events::SYSTEM if msg.reply_status() == Some("error") => {
            let message = msg
                .payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("subscription error");
            Inbound::Signal(FeedSignal::Dropped(message.to_string()))
        }
        _ => Inbound::Ignore,
    }
}

/// Pump the channel until the subscriber goes away or the socket dies.
///
/// A heartbeat still unanswered when the next one is due counts as a dead
/// socket.
async fn run_channel(
    mut write: SocketWrite,
    mut read: SocketRead,
    sender: FeedSender,
    topic: String,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // ref 1 belongs to the join
    let mut next_ref: u64 = 2;
    let mut unanswered_heartbeat: Option<String> = None;

    let reason = loop {
        tokio::select! {
            _ = sender.closed() => {
                debug!("Leaving notification channel {}", topic);
                let _ = send(&mut write, &PhoenixMessage::leave(&topic, &next_ref.to_string())).await;
                let _ = write.close().await;
                return;
            }
            _ = heartbeat.tick() => {
                if unanswered_heartbeat.is_some() {
                    break "heartbeat timeout".to_string();
                }
                let heartbeat_ref = next_ref.to_string();
                next_ref += 1;
                if let Err(e) = send(&mut write, &PhoenixMessage::heartbeat(&heartbeat_ref)).await {
                    break format!("heartbeat failed: {}", e);
                }
                unanswered_heartbeat = Some(heartbeat_ref);
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let msg = match serde_json::from_str::<PhoenixMessage>(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!("Failed to parse realtime message: {} - {}", e, text.as_str());
                            continue;
                        }
                    };
                    if unanswered_heartbeat
                        .as_deref()
                        .is_some_and(|heartbeat_ref| msg.is_reply_to(PHOENIX_TOPIC, heartbeat_ref))
                    {
                        unanswered_heartbeat = None;
                        continue;
                    }
                    match classify(&msg, &topic) {
                        Inbound::Signal(FeedSignal::Dropped(reason)) => break reason,
                        Inbound::Signal(signal) => {
                            if !sender.send(signal).await {
                                let _ = write.close().await;
                                return;
                            }
                        }
                        Inbound::Malformed(e) => warn!("Malformed notification change: {}", e),
                        Inbound::Ignore => {}
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        break format!("failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(_))) => break "socket closed by server".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("socket error: {}", e),
                None => break "socket stream ended".to_string(),
            },
        }
    };

    info!("Notification channel {} dropped: {}", topic, reason);
    sender.send(FeedSignal::Dropped(reason)).await;
}
