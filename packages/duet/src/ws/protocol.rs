//! WebSocket Protocol Types
//!
//! JSON text frames, tagged by `type`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{MessageView, Principal, UserRef};

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    PrivateMessage {
        #[serde(default)]
        to: String,
        #[serde(default)]
        message: String,
    },
    Typing {
        to: String,
    },
    StopTyping {
        to: String,
    },
    /// Soft-delete over the socket. Only the author may do this.
    DeleteMessage {
        #[serde(
            rename = "messageId",
            alias = "message_id",
            deserialize_with = "message_id"
        )]
        message_id: i64,
    },
    /// Restore over the socket. Admin only.
    RestoreMessage {
        #[serde(
            rename = "messageId",
            alias = "message_id",
            deserialize_with = "message_id"
        )]
        message_id: i64,
    },
    /// Relay after a delete performed over HTTP. The server checks the store
    /// and derives the recipient itself; `to` is advisory.
    MessageDeleted {
        #[serde(
            rename = "messageId",
            alias = "message_id",
            deserialize_with = "message_id"
        )]
        message_id: i64,
        #[serde(default)]
        to: Option<String>,
    },
    /// Relay after a restore performed over HTTP. The relayed body is
    /// ignored in favor of the stored one.
    MessageRestored {
        #[serde(
            rename = "messageId",
            alias = "message_id",
            deserialize_with = "message_id"
        )]
        message_id: i64,
        #[serde(default)]
        message: Option<serde_json::Value>,
        #[serde(default)]
        to: Option<String>,
    },
}

/// Accept message ids as JSON numbers or numeric strings.
fn message_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid message id: {s}"))),
    }
}

/// The `{id, from, to, message, timestamp}` shape shared by
/// `private_message` and `message_sent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: i64,
    pub from: UserRef,
    pub to: UserRef,
    pub message: String,
    pub timestamp: i64,
}

impl From<&MessageView> for ChatPayload {
    fn from(view: &MessageView) -> Self {
        Self {
            id: view.id,
            from: view.from.clone(),
            to: view.to.clone(),
            message: view.message.clone(),
            timestamp: view.timestamp,
        }
    }
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First frame on every connection.
    Connected {
        connection_id: String,
        user: Principal,
    },
    PrivateMessage(ChatPayload),
    MessageSent(ChatPayload),
    UserTyping {
        from: String,
        username: String,
    },
    UserStopTyping {
        from: String,
    },
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    MessageRestored {
        #[serde(rename = "messageId")]
        message_id: i64,
        message: MessageView,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}
