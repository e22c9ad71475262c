//! Per-channel append-only message log.
//!
//! Messages live at `channels/{channelId}/messages/{messageId}`. Keys come
//! from the engine's push sequence, so they sort in creation order. The only
//! mutation after append is attaching the URL of a photo message.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use chitchat_shared::constants::PHOTO_URL_NOT_SET;
use chitchat_shared::{
    paths, ChannelId, EventKind, Message, MessageId, MessagePayload, PhotoRef, UserId,
};

use crate::error::{ChatError, DecodeError, ValidationError, WriteError};
use crate::query::Query;
use crate::realtime::{ChildEvent, RealtimeEngine, Subscription};

/// Persisted shape of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(
        rename = "photoURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    photo_url: Option<String>,
}

/// Behaviour switches of the log.
#[derive(Debug, Clone)]
pub struct LogPolicy {
    /// Reject attaching a URL to a photo message that already has one.
    pub enforce_single_attach: bool,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            enforce_single_attach: true,
        }
    }
}

/// A change to a message in a channel's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub kind: EventKind,
    pub message: Message,
}

#[derive(Clone)]
pub struct MessageLog {
    engine: RealtimeEngine,
    policy: LogPolicy,
}

impl MessageLog {
    pub fn new(engine: RealtimeEngine, policy: LogPolicy) -> Self {
        Self { engine, policy }
    }

    pub fn policy(&self) -> &LogPolicy {
        &self.policy
    }

    pub async fn append_text(
        &self,
        channel: &ChannelId,
        sender_id: &UserId,
        sender_name: &str,
        text: &str,
    ) -> Result<MessageId, ChatError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }

        let record = MessageRecord {
            sender_id: sender_id.to_string(),
            sender_name: Some(sender_name.to_string()),
            text: Some(text.to_string()),
            photo_url: None,
        };
        let id = self.append(channel, record).await?;
        debug!(channel = %channel, message = %id, sender = %sender_id, "Text message appended");
        Ok(id)
    }

    /// Append a photo message whose image is not uploaded yet.
    pub async fn append_photo_placeholder(
        &self,
        channel: &ChannelId,
        sender_id: &UserId,
        sender_name: Option<&str>,
    ) -> Result<MessageId, ChatError> {
        let record = MessageRecord {
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(str::to_string),
            text: None,
            photo_url: Some(PHOTO_URL_NOT_SET.to_string()),
        };
        let id = self.append(channel, record).await?;
        debug!(channel = %channel, message = %id, sender = %sender_id, "Photo placeholder appended");
        Ok(id)
    }

    /// Replace the placeholder of a photo message with its media URL.
    pub async fn attach_photo_url(
        &self,
        channel: &ChannelId,
        message_id: &MessageId,
        url: &str,
    ) -> Result<(), ChatError> {
        if url.is_empty() || url == PHOTO_URL_NOT_SET {
            return Err(ValidationError::InvalidUrl(url.to_string()).into());
        }

        let path = paths::message(channel, message_id);
        let enforce = self.policy.enforce_single_attach;

        self.engine
            .transact(&path, |current| {
                let Some(current) = current else {
                    return Err(WriteError::NotFound(path.clone()));
                };
                let mut record: MessageRecord = serde_json::from_value(current.clone())
                    .map_err(|_| WriteError::NotAPhoto(message_id.clone()))?;
                match record.photo_url.as_deref() {
                    None => return Err(WriteError::NotAPhoto(message_id.clone())),
                    Some(existing) if enforce && existing != PHOTO_URL_NOT_SET => {
                        return Err(WriteError::PhotoAlreadyAttached(message_id.clone()))
                    }
                    Some(_) => {}
                }
                record.photo_url = Some(url.to_string());
                serde_json::to_value(&record).map_err(|e| WriteError::InvalidValue(e.to_string()))
            })
            .await?;

        info!(channel = %channel, message = %message_id, url, "Photo attached");
        Ok(())
    }

    /// Up to `limit` most recent messages, then live additions and changes.
    pub async fn subscribe_recent(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<MessageFeed, ChatError> {
        let inner = self
            .engine
            .subscribe(&paths::messages(channel), Query::all().limit_to_last(limit))
            .await?;
        Ok(MessageFeed {
            channel: *channel,
            inner,
        })
    }

    /// Snapshot of the `limit` most recent well-formed messages, oldest first.
    pub async fn recent(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>, ChatError> {
        let children = self
            .engine
            .subscribe_once(&paths::messages(channel), &Query::all().limit_to_last(limit))
            .await?;

        Ok(children
            .into_iter()
            .filter_map(|(key, value)| match decode_message(channel, &key, value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Skipping malformed message record");
                    None
                }
            })
            .collect())
    }

    async fn append(&self, channel: &ChannelId, record: MessageRecord) -> Result<MessageId, ChatError> {
        if self.engine.get(&paths::channel(channel)).await?.is_none() {
            return Err(WriteError::NotFound(paths::channel(channel)).into());
        }

        let value =
            serde_json::to_value(&record).map_err(|e| WriteError::InvalidValue(e.to_string()))?;
        let key = self.engine.push(&paths::messages(channel), value).await?;
        Ok(MessageId(key))
    }
}

/// Stream of message events for one channel.
pub struct MessageFeed {
    channel: ChannelId,
    inner: Subscription,
}

impl MessageFeed {
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn lagged(&self) -> bool {
        self.inner.lagged()
    }
}

impl Stream for MessageFeed {
    type Item = MessageEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let ChildEvent { kind, key, value } = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(event)) => event,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            if kind == EventKind::Removed {
                continue;
            }
            match decode_message(&self.channel, &key, value) {
                Ok(message) => return Poll::Ready(Some(MessageEvent { kind, message })),
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Skipping malformed message record")
                }
            }
        }
    }
}

fn decode_message(channel: &ChannelId, key: &str, value: Value) -> Result<Message, DecodeError> {
    let record: MessageRecord = serde_json::from_value(value).map_err(|e| DecodeError::Shape {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let payload = match (record.text, record.photo_url) {
        (Some(text), None) if text.trim().is_empty() => {
            return Err(DecodeError::BlankText {
                key: key.to_string(),
            })
        }
        (Some(text), None) => MessagePayload::Text { text },
        (None, Some(url)) => MessagePayload::Photo {
            photo: PhotoRef::from_stored(&url),
        },
        (Some(_), Some(_)) => {
            return Err(DecodeError::AmbiguousPayload {
                key: key.to_string(),
            })
        }
        (None, None) => {
            return Err(DecodeError::MissingPayload {
                key: key.to_string(),
            })
        }
    };

    Ok(Message {
        id: MessageId(key.to_string()),
        channel_id: *channel,
        sender_id: UserId(record.sender_id),
        sender_name: record.sender_name,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ChannelDirectory;
    use crate::realtime::EngineConfig;
    use chitchat_store::Database;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: RealtimeEngine,
        log: MessageLog,
        channel: ChannelId,
    }

    async fn fixture(policy: LogPolicy) -> Fixture {
        let engine =
            RealtimeEngine::open(Database::open_in_memory().unwrap(), EngineConfig::default())
                .unwrap();
        let channel = ChannelDirectory::new(engine.clone())
            .create_channel("general")
            .await
            .unwrap();
        Fixture {
            log: MessageLog::new(engine.clone(), policy),
            engine,
            channel,
        }
    }

    async fn next(feed: &mut MessageFeed) -> MessageEvent {
        tokio::time::timeout(Duration::from_millis(100), feed.next())
            .await
            .expect("event expected")
            .expect("feed ended")
    }

    #[tokio::test]
    async fn test_append_text_then_subscribe() {
        let f = fixture(LogPolicy::default()).await;
        let alice = UserId::new("alice");
        let m1 = f.log.append_text(&f.channel, &alice, "Alice", "hi").await.unwrap();

        let mut feed = f.log.subscribe_recent(&f.channel, 25).await.unwrap();
        let event = next(&mut feed).await;
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.message.id, m1);
        assert_eq!(event.message.text(), Some("hi"));
        assert_eq!(event.message.sender_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_replay_capped_and_ordered() {
        let f = fixture(LogPolicy::default()).await;
        let alice = UserId::new("alice");
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                f.log
                    .append_text(&f.channel, &alice, "Alice", &format!("m{i}"))
                    .await
                    .unwrap(),
            );
        }

        let mut feed = f.log.subscribe_recent(&f.channel, 3).await.unwrap();
        for expected in &ids[2..] {
            assert_eq!(&next(&mut feed).await.message.id, expected);
        }
        assert!(tokio::time::timeout(Duration::from_millis(20), feed.next())
            .await
            .is_err());

        let recent = f.log.recent(&f.channel, 2).await.unwrap();
        assert_eq!(recent.iter().map(|m| &m.id).collect::<Vec<_>>(), vec![&ids[3], &ids[4]]);
    }

    #[tokio::test]
    async fn test_thread_opens_on_last_25() {
        let f = fixture(LogPolicy::default()).await;
        let alice = UserId::new("alice");
        let mut ids = Vec::new();
        for i in 0..30 {
            ids.push(
                f.log
                    .append_text(&f.channel, &alice, "Alice", &format!("m{i}"))
                    .await
                    .unwrap(),
            );
        }

        let mut feed = f.log.subscribe_recent(&f.channel, 25).await.unwrap();
        for expected in &ids[5..] {
            let event = next(&mut feed).await;
            assert_eq!(event.kind, EventKind::Added);
            assert_eq!(&event.message.id, expected);
        }
        assert!(tokio::time::timeout(Duration::from_millis(20), feed.next())
            .await
            .is_err());

        // live appends still arrive past the cap
        let live = f
            .log
            .append_text(&f.channel, &alice, "Alice", "m30")
            .await
            .unwrap();
        assert_eq!(next(&mut feed).await.message.id, live);
    }

    #[tokio::test]
    async fn test_validation_and_unknown_channel() {
        let f = fixture(LogPolicy::default()).await;
        let alice = UserId::new("alice");
        assert!(matches!(
            f.log.append_text(&f.channel, &alice, "Alice", "  ").await,
            Err(ChatError::Validation(ValidationError::EmptyText))
        ));
        assert!(matches!(
            f.log.append_text(&ChannelId::new(), &alice, "Alice", "hi").await,
            Err(ChatError::Write(WriteError::NotFound(_)))
        ));
        assert!(f.log.recent(&f.channel, 25).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_then_attach_emits_changed() {
        let f = fixture(LogPolicy::default()).await;
        let bob = UserId::new("bob");
        let mut feed = f.log.subscribe_recent(&f.channel, 25).await.unwrap();

        let m = f.log.append_photo_placeholder(&f.channel, &bob, None).await.unwrap();
        let added = next(&mut feed).await;
        assert_eq!(added.kind, EventKind::Added);
        assert_eq!(added.message.photo(), Some(&PhotoRef::Pending));

        f.log
            .attach_photo_url(&f.channel, &m, "gs://chitchat-media/bob/1.jpg")
            .await
            .unwrap();
        let changed = next(&mut feed).await;
        assert_eq!(changed.kind, EventKind::Changed);
        assert_eq!(changed.message.id, m);
        assert_eq!(
            changed.message.photo().and_then(PhotoRef::url),
            Some("gs://chitchat-media/bob/1.jpg")
        );

        let replay = f.log.recent(&f.channel, 25).await.unwrap();
        assert!(replay[0].photo().unwrap().is_present());
    }

    #[tokio::test]
    async fn test_attach_rejections() {
        let f = fixture(LogPolicy::default()).await;
        let bob = UserId::new("bob");
        let text = f.log.append_text(&f.channel, &bob, "Bob", "hi").await.unwrap();
        let photo = f.log.append_photo_placeholder(&f.channel, &bob, Some("Bob")).await.unwrap();

        assert!(matches!(
            f.log.attach_photo_url(&f.channel, &text, "gs://b/x").await,
            Err(ChatError::Write(WriteError::NotAPhoto(_)))
        ));
        assert!(matches!(
            f.log.attach_photo_url(&f.channel, &MessageId("nope".into()), "gs://b/x").await,
            Err(ChatError::Write(WriteError::NotFound(_)))
        ));
        assert!(matches!(
            f.log.attach_photo_url(&f.channel, &photo, PHOTO_URL_NOT_SET).await,
            Err(ChatError::Validation(ValidationError::InvalidUrl(_)))
        ));

        f.log.attach_photo_url(&f.channel, &photo, "gs://b/1").await.unwrap();
        assert!(matches!(
            f.log.attach_photo_url(&f.channel, &photo, "gs://b/2").await,
            Err(ChatError::Write(WriteError::PhotoAlreadyAttached(_)))
        ));
    }

    #[tokio::test]
    async fn test_reattach_allowed_when_not_enforced() {
        let f = fixture(LogPolicy {
            enforce_single_attach: false,
        })
        .await;
        let bob = UserId::new("bob");
        let photo = f.log.append_photo_placeholder(&f.channel, &bob, None).await.unwrap();
        f.log.attach_photo_url(&f.channel, &photo, "gs://b/1").await.unwrap();
        f.log.attach_photo_url(&f.channel, &photo, "gs://b/2").await.unwrap();

        let recent = f.log.recent(&f.channel, 1).await.unwrap();
        assert_eq!(recent[0].photo().and_then(PhotoRef::url), Some("gs://b/2"));
    }

    #[tokio::test]
    async fn test_malformed_message_skipped_stream_continues() {
        let f = fixture(LogPolicy::default()).await;
        let mut feed = f.log.subscribe_recent(&f.channel, 25).await.unwrap();

        let messages = paths::messages(&f.channel);
        f.engine
            .push(&messages, json!({"senderId": "x", "text": "a", "photoURL": "b"}))
            .await
            .unwrap();
        f.engine.push(&messages, json!({"senderId": "x"})).await.unwrap();
        f.engine.push(&messages, json!("garbage")).await.unwrap();
        f.engine
            .push(&messages, json!({"senderId": "x", "text": ""}))
            .await
            .unwrap();
        f.engine
            .push(&messages, json!({"senderId": "x", "text": "  "}))
            .await
            .unwrap();
        let good = f
            .log
            .append_text(&f.channel, &UserId::new("alice"), "Alice", "still here")
            .await
            .unwrap();

        assert_eq!(next(&mut feed).await.message.id, good);

        let recent = f.log.recent(&f.channel, 25).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, good);
    }

    #[test]
    fn test_decode_payload_variants() {
        let ch = ChannelId::new();
        assert_eq!(
            decode_message(&ch, "k", json!({"senderId": "x", "text": "a", "photoURL": "b"})),
            Err(DecodeError::AmbiguousPayload { key: "k".into() })
        );
        assert_eq!(
            decode_message(&ch, "k", json!({"senderId": "x"})),
            Err(DecodeError::MissingPayload { key: "k".into() })
        );
        assert_eq!(
            decode_message(&ch, "k", json!({"senderId": "x", "text": ""})),
            Err(DecodeError::BlankText { key: "k".into() })
        );
        let m = decode_message(&ch, "k", json!({"senderId": "x", "photoURL": "NOTSET"})).unwrap();
        assert_eq!(m.photo(), Some(&PhotoRef::Pending));
        assert_eq!(m.sender_name, None);
    }
}
