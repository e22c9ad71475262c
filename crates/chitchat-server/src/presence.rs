//! Typing indicator.
//!
//! Each user has a boolean at `channels/{channelId}/typingIndicator/{userId}`.
//! Setting it to `true` also asks the engine to remove it when the writer's
//! session ends, so a crashed client never leaves a stuck indicator.

use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tracing::debug;

use chitchat_shared::{paths, ChannelId, EventKind, UserId};

use crate::error::ChatError;
use crate::query::Query;
use crate::realtime::{ChildEvent, RealtimeEngine, Subscription};
use crate::session::SessionId;

fn typing_query() -> Query {
    Query::all().order_by_value().equal_to(true)
}

#[derive(Clone)]
pub struct PresenceTracker {
    engine: RealtimeEngine,
}

impl PresenceTracker {
    pub fn new(engine: RealtimeEngine) -> Self {
        Self { engine }
    }

    /// Set `user`'s typing flag in `channel`.  Last write wins.
    pub async fn set_typing(
        &self,
        session: &SessionId,
        channel: &ChannelId,
        user: &UserId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let path = paths::typing_flag(channel, user);
        if is_typing {
            self.engine
                .write_until_disconnect(session, &path, Value::Bool(true))
                .await?;
        } else {
            self.engine.write(&path, Value::Bool(false)).await?;
        }
        debug!(channel = %channel, user = %user, is_typing, "Typing flag set");
        Ok(())
    }

    /// Whether anyone other than `excluding_self` is typing, emitted on change.
    pub async fn subscribe_anyone_typing(
        &self,
        channel: &ChannelId,
        excluding_self: &UserId,
    ) -> Result<TypingFeed, ChatError> {
        let inner = self
            .engine
            .subscribe(&paths::typing_indicator(channel), typing_query())
            .await?;
        Ok(TypingFeed {
            inner,
            me: excluding_self.as_str().to_string(),
            typing: HashSet::new(),
        })
    }

    /// Users currently flagged as typing.
    pub async fn who_is_typing(&self, channel: &ChannelId) -> Result<Vec<UserId>, ChatError> {
        let flags = self
            .engine
            .subscribe_once(&paths::typing_indicator(channel), &typing_query())
            .await?;
        Ok(flags.into_iter().map(|(key, _)| UserId(key)).collect())
    }
}

/// Emits `true` when the first other user starts typing and `false` when the
/// last one stops.
pub struct TypingFeed {
    inner: Subscription,
    me: String,
    typing: HashSet<String>,
}

impl TypingFeed {
    pub fn lagged(&self) -> bool {
        self.inner.lagged()
    }

    fn apply(&mut self, event: ChildEvent) -> Option<bool> {
        if event.key == self.me {
            return None;
        }
        let was_anyone = !self.typing.is_empty();
        match event.kind {
            EventKind::Added | EventKind::Changed => {
                self.typing.insert(event.key);
            }
            EventKind::Removed => {
                self.typing.remove(&event.key);
            }
        }
        let is_anyone = !self.typing.is_empty();
        (was_anyone != is_anyone).then_some(is_anyone)
    }
}

impl Stream for TypingFeed {
    type Item = bool;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let event = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(event)) => event,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            if let Some(anyone) = self.apply(event) {
                return Poll::Ready(Some(anyone));
            }
        }
    }
}
