//! Application protocol messages
//!
//! Everything that travels inside Text frames is JSON with a required
//! `type` field. Client messages decode into a tagged enum with an
//! `Unknown` catch-all, so unrecognized types are carried explicitly and
//! dropped by the router instead of failing the parse.

use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::store::ChatMessage;

/// A decoded client→server message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `{"type":"auth","token":"..."}`
    Auth {
        #[serde(default)]
        token: Option<String>,
    },
    /// `{"type":"message","message":"..."}`
    Message {
        #[serde(default)]
        message: Option<String>,
    },
    /// `{"type":"typing","isTyping":true}`
    Typing {
        #[serde(rename = "isTyping", default)]
        is_typing: bool,
    },
    /// `{"type":"ping"}`
    Ping,
    /// Any other `type` value; ignored by the router
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Decode a Text-frame payload
    ///
    /// Returns `None` for undecodable JSON; malformed payloads are an
    /// explicit tolerance policy, not an error.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// A server→client event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Welcome event sent right after the handshake completes
    Connected { message: String, timestamp: String },
    /// Authentication succeeded
    AuthSuccess { user: Identity },
    /// Authentication failed; the connection stays open for retry
    AuthError { message: String },
    /// A chat message, broadcast after it has been durably saved
    Message { message: ChatMessage },
    /// Typing indicator, relayed to everyone but the sender
    Typing {
        #[serde(rename = "userId")]
        user_id: i64,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    /// A user authenticated on another connection
    UserJoined { user: Identity, timestamp: String },
    /// An authenticated user disconnected
    UserLeft { user: Identity, timestamp: String },
    /// Application-level ping reply
    Pong,
    /// Recoverable error reported to the sender only
    Error { message: String },
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

impl ServerEvent {
    /// The welcome event for a freshly upgraded connection
    pub fn connected() -> Self {
        ServerEvent::Connected {
            message: "Connected to chat server".to_string(),
            timestamp: now_iso8601(),
        }
    }

    pub fn auth_success(user: Identity) -> Self {
        ServerEvent::AuthSuccess { user }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        ServerEvent::AuthError {
            message: message.into(),
        }
    }

    pub fn message(message: ChatMessage) -> Self {
        ServerEvent::Message { message }
    }

    pub fn typing(user: &Identity, is_typing: bool) -> Self {
        ServerEvent::Typing {
            user_id: user.id,
            user_name: user.name.clone(),
            is_typing,
        }
    }

    pub fn user_joined(user: Identity) -> Self {
        ServerEvent::UserJoined {
            user,
            timestamp: now_iso8601(),
        }
    }

    pub fn user_left(user: Identity) -> Self {
        ServerEvent::UserLeft {
            user,
            timestamp: now_iso8601(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Encode to the JSON wire form
    pub fn to_json(&self) -> Vec<u8> {
        // Serialization of these variants cannot fail; fall back to an
        // empty error event rather than panic in the broadcast path.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"type\":\"error\"}".to_vec())
    }
}
