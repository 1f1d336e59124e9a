// Core data types shared across the chat delivery client

use serde::{Deserialize, Serialize};

/// What kind of payload a queued message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Text,
    Media,
}

/// A message authored while the primary channel was unusable.
///
/// The id is client-generated and stable for the message's whole lifetime;
/// the realtime channel may later deliver the same message back to us and the
/// UI deduplicates on this id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Epoch milliseconds, stamped at enqueue time
    pub enqueued_at: i64,
}

impl QueuedMessage {
    pub fn text(chat_id: &str, content: &str) -> Self {
        QueuedMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            parent_id: None,
            enqueued_at: crate::utils::epoch_millis(),
        }
    }

    pub fn media(chat_id: &str, upload_ref: &str) -> Self {
        QueuedMessage {
            kind: MessageKind::Media,
            ..Self::text(chat_id, upload_ref)
        }
    }

    pub fn reply_to(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }
}

/// Connection status for one chat view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Full connection state tracked by the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn new() -> Self {
        ConnectionState {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Ephemeral "who is typing now" record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: String,
    pub name: String,
}

/// Inbound typing-state transition for one user in one chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user_id: String,
    pub name: String,
    pub is_typing: bool,
}

/// The `{event, payload}` envelope delivered on a realtime broadcast channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

/// A raw transport frame, forwarded to the UI layer untouched.
/// Decoding the event kind is the UI's concern, not ours.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub chat_id: String,
    pub raw: String,
}
