//! Domain models handed to subscribers.
//!
//! These are the decoded, validated forms of what the server persists. Every
//! struct derives `Serialize`/`Deserialize` so it can travel over the wire
//! protocol unchanged.

use serde::{Deserialize, Serialize};

use crate::constants::PHOTO_URL_NOT_SET;
use crate::types::{ChannelId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// Kind of an incremental change delivered to subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Added,
    Changed,
    Removed,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A named chat room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// State of the image behind a photo message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhotoRef {
    /// Upload still in flight; the stored URL is the sentinel.
    Pending,
    /// The media URL has been attached.
    Ready { url: String },
}

impl PhotoRef {
    /// Interpret a stored `photoURL` field.
    pub fn from_stored(url: &str) -> Self {
        if url == PHOTO_URL_NOT_SET {
            Self::Pending
        } else {
            Self::Ready {
                url: url.to_string(),
            }
        }
    }

    /// The value persisted for this reference.
    pub fn stored_value(&self) -> &str {
        match self {
            Self::Pending => PHOTO_URL_NOT_SET,
            Self::Ready { url } => url,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Ready { url } => Some(url),
        }
    }
}

/// Message body: text or a photo reference, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Text { text: String },
    Photo { photo: PhotoRef },
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    /// Display name captured when the message was written. Photo messages
    /// may be posted without one.
    pub sender_name: Option<String>,
    pub payload: MessagePayload,
}

impl Message {
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            MessagePayload::Text { text } => Some(text),
            MessagePayload::Photo { .. } => None,
        }
    }

    pub fn photo(&self) -> Option<&PhotoRef> {
        match &self.payload {
            MessagePayload::Photo { photo } => Some(photo),
            MessagePayload::Text { .. } => None,
        }
    }
}
