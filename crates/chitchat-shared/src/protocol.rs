use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::{Channel, EventKind, Message};
use crate::types::{ChannelId, MessageId, UserId};

/// Frames a client sends over the realtime WebSocket.
///
/// Writes carry a client-chosen `id` echoed back in the matching `Ack` or
/// `Error`. Subscriptions carry a client-chosen `sub` used to tag every event
/// they produce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SubscribeChannels {
        sub: u64,
    },
    SubscribeMessages {
        sub: u64,
        channel_id: ChannelId,
        /// Defaults to the server's recent limit.
        #[serde(default)]
        limit: Option<usize>,
    },
    SubscribeTyping {
        sub: u64,
        channel_id: ChannelId,
    },
    Unsubscribe {
        sub: u64,
    },
    CreateChannel {
        id: u64,
        name: String,
    },
    SendText {
        id: u64,
        channel_id: ChannelId,
        text: String,
    },
    SendPhotoPlaceholder {
        id: u64,
        channel_id: ChannelId,
    },
    AttachPhoto {
        id: u64,
        channel_id: ChannelId,
        message_id: MessageId,
        url: String,
    },
    SetTyping {
        id: u64,
        channel_id: ChannelId,
        typing: bool,
    },
    Ping,
}

/// Why the server ended a subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client asked for it.
    Unsubscribed,
    /// The subscriber fell too far behind; resubscribe to get a fresh replay.
    Lagged,
    /// The server is shutting down or the engine dropped the feed.
    Ended,
}

/// Frames the server pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello {
        user_id: UserId,
        protocol: String,
    },
    Ack {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
    ChannelAdded {
        sub: u64,
        channel: Channel,
    },
    Message {
        sub: u64,
        event: EventKind,
        message: Message,
    },
    Typing {
        sub: u64,
        anyone_typing: bool,
    },
    SubscriptionClosed {
        sub: u64,
        reason: CloseReason,
    },
    Pong,
}

impl ServerFrame {
    pub fn ack(id: u64) -> Self {
        Self::Ack {
            id,
            channel_id: None,
            message_id: None,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }
}
