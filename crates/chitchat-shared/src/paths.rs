//! Logical path layout of the realtime store.
//!
//! ```text
//! channels/{channelId}                          { "name": ... }
//! channels/{channelId}/messages/{messageId}     { "senderId", "senderName", "text" | "photoURL" }
//! channels/{channelId}/typingIndicator/{userId} true
//! ```
//!
//! A path names a child inside a collection: everything before the last
//! segment is the collection, the last segment is the key.

use crate::types::{ChannelId, MessageId, UserId};

pub const CHANNELS: &str = "channels";
pub const MESSAGES: &str = "messages";
pub const TYPING_INDICATOR: &str = "typingIndicator";

pub fn channel(id: &ChannelId) -> String {
    format!("{CHANNELS}/{id}")
}

pub fn messages(channel_id: &ChannelId) -> String {
    format!("{CHANNELS}/{channel_id}/{MESSAGES}")
}

pub fn message(channel_id: &ChannelId, message_id: &MessageId) -> String {
    format!("{}/{message_id}", messages(channel_id))
}

pub fn typing_indicator(channel_id: &ChannelId) -> String {
    format!("{CHANNELS}/{channel_id}/{TYPING_INDICATOR}")
}

pub fn typing_flag(channel_id: &ChannelId, user_id: &UserId) -> String {
    format!("{}/{user_id}", typing_indicator(channel_id))
}

/// Split a child path into `(collection, key)`.
///
/// Returns `None` for paths with fewer than two segments or with empty or
/// relative (`.`/`..`) segments.
pub fn split_child(path: &str) -> Option<(&str, &str)> {
    if !is_valid(path) {
        return None;
    }
    let (collection, key) = path.rsplit_once('/')?;
    Some((collection, key))
}

/// A collection or child path is valid when every segment is non-empty and
/// none is `.` or `..`.
pub fn is_valid(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}
