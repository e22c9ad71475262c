//! Client-side caches fed purely by the server's ordered event streams.
//!
//! A client never mutates these directly: the only entry points are the
//! `apply` functions, so local state is always a projection of the events
//! received so far. Delivery is at-least-once, so applying the same event
//! twice must leave the cache unchanged.

use std::collections::HashMap;

use crate::models::{Channel, EventKind, Message};
use crate::types::{ChannelId, MessageId};

/// Channels in the order they were first announced.
#[derive(Debug, Default, Clone)]
pub struct ChannelCache {
    channels: Vec<Channel>,
    index: HashMap<ChannelId, usize>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `channel_added` event. Returns `true` if the channel was new.
    pub fn apply(&mut self, channel: Channel) -> bool {
        if let Some(&pos) = self.index.get(&channel.id) {
            self.channels[pos] = channel;
            return false;
        }
        self.index.insert(channel.id, self.channels.len());
        self.channels.push(channel);
        true
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Messages of one thread in log order.
#[derive(Debug, Default, Clone)]
pub struct ThreadCache {
    messages: Vec<Message>,
}

impl ThreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, kind: EventKind, message: Message) {
        let existing = self.position(&message.id);
        match (kind, existing) {
            (EventKind::Added | EventKind::Changed, Some(pos)) => self.messages[pos] = message,
            (EventKind::Added, None) => {
                // ids sort in creation order; keep the thread sorted even if a
                // replay overlaps live events
                let pos = self.messages.partition_point(|m| m.id < message.id);
                self.messages.insert(pos, message);
            }
            // change for a message outside the replay window
            (EventKind::Changed, None) => {}
            (EventKind::Removed, Some(pos)) => {
                self.messages.remove(pos);
            }
            (EventKind::Removed, None) => {}
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|pos| &self.messages[pos])
    }

    /// Photo messages still waiting for their URL.
    pub fn pending_photos(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| m.photo().is_some_and(|p| !p.is_present()))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessagePayload, PhotoRef};
    use crate::types::UserId;

    fn text(id: &str, body: &str) -> Message {
        Message {
            id: MessageId(id.to_string()),
            channel_id: ChannelId::default(),
            sender_id: UserId::new("b"),
            sender_name: Some("Bea".into()),
            payload: MessagePayload::Text { text: body.into() },
        }
    }

    fn photo(id: &str, photo: PhotoRef) -> Message {
        Message {
            id: MessageId(id.to_string()),
            channel_id: ChannelId::default(),
            sender_id: UserId::new("a"),
            sender_name: None,
            payload: MessagePayload::Photo { photo },
        }
    }

    #[test]
    fn test_duplicate_added_is_idempotent() {
        let mut cache = ThreadCache::new();
        cache.apply(EventKind::Added, text("0001", "hi"));
        cache.apply(EventKind::Added, text("0001", "hi"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_added_keeps_log_order() {
        let mut cache = ThreadCache::new();
        cache.apply(EventKind::Added, text("0002", "second"));
        cache.apply(EventKind::Added, text("0001", "first"));
        let ids: Vec<_> = cache.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["0001", "0002"]);
    }

    #[test]
    fn test_changed_resolves_pending_photo() {
        let mut cache = ThreadCache::new();
        cache.apply(EventKind::Added, photo("0001", PhotoRef::Pending));
        assert_eq!(cache.pending_photos().count(), 1);

        cache.apply(
            EventKind::Changed,
            photo(
                "0001",
                PhotoRef::Ready {
                    url: "gs://bucket/p.jpg".into(),
                },
            ),
        );
        assert_eq!(cache.pending_photos().count(), 0);
        let msg = cache.get(&MessageId("0001".into())).unwrap();
        assert_eq!(msg.photo().and_then(PhotoRef::url), Some("gs://bucket/p.jpg"));
    }

    #[test]
    fn test_changed_for_unknown_message_ignored() {
        let mut cache = ThreadCache::new();
        cache.apply(EventKind::Changed, text("0009", "late"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_channel_cache_dedupes() {
        let mut cache = ChannelCache::new();
        let ch = Channel {
            id: ChannelId::new(),
            name: "general".into(),
        };
        assert!(cache.apply(ch.clone()));
        assert!(!cache.apply(ch));
        assert_eq!(cache.len(), 1);
    }
}
