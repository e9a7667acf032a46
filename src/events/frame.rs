//! Wire format for the shard transport
//!
//! JSON frames over the WebSocket endpoint, plus the payload shapes
//! shared with the shard's REST endpoints.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};

/// A user as seen by the local viewer; `followed` is the viewer's
/// relation to that user, not a global property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub followed: bool,
}

/// Direct message between two users. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: u64,
}

/// Timeline post. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessage {
    pub from: String,
    pub text: String,
    pub timestamp: u64,
}

/// The chat-thread key for a message: the participant who is not the
/// local user, regardless of direction. Self-echoes of outgoing
/// messages land under the same peer as the replies they answer.
pub fn peer_of<'a>(local_user: &str, msg: &'a ChatMessage) -> &'a str {
    if msg.from == local_user {
        &msg.to
    } else {
        &msg.from
    }
}

/// Current wall-clock time in integer milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Push topics, scoped to the local user
pub mod topics {
    pub const TIMELINE_PREFIX: &str = "timeline-";
    pub const CHAT_PREFIX: &str = "chat-";

    pub fn timeline(username: &str) -> String {
        format!("{TIMELINE_PREFIX}{username}")
    }

    pub fn chat(username: &str) -> String {
        format!("{CHAT_PREFIX}{username}")
    }
}

/// Publish destinations on the shard
pub mod destinations {
    /// Direct chat sends
    pub const CHAT: &str = "/app/chat";
    /// Timeline post sends
    pub const POST: &str = "/app/post";
}

/// A frame on the shard transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client -> server: register interest in a push topic
    Subscribe { topic: String },
    /// Client -> server: publish a payload to an app destination
    Send {
        destination: String,
        body: serde_json::Value,
    },
    /// Server -> client: push delivery on a subscribed topic
    Message {
        topic: String,
        body: serde_json::Value,
    },
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A decoded push delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Timeline(PostMessage),
    Chat(ChatMessage),
}

impl PushEvent {
    /// Decode a `Message` frame body by its topic. Topics outside the
    /// two per-user subscriptions, and bodies that do not match the
    /// topic's payload shape, are protocol errors.
    pub fn decode(topic: &str, body: serde_json::Value) -> Result<Self, SessionError> {
        let protocol = |detail: String| SessionError::Protocol {
            topic: topic.to_string(),
            detail,
        };

        if topic.starts_with(topics::TIMELINE_PREFIX) {
            serde_json::from_value(body)
                .map(PushEvent::Timeline)
                .map_err(|e| protocol(e.to_string()))
        } else if topic.starts_with(topics::CHAT_PREFIX) {
            serde_json::from_value(body)
                .map(PushEvent::Chat)
                .map_err(|e| protocol(e.to_string()))
        } else {
            Err(protocol("unknown topic".to_string()))
        }
    }
}
