//! Channel directory.  Owns `channels/{id}` records.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use chitchat_shared::{paths, Channel, ChannelId, EventKind};

use crate::error::{ChatError, DecodeError, ValidationError};
use crate::query::Query;
use crate::realtime::{ChildEvent, RealtimeEngine, Subscription};

/// Persisted shape of a channel.
#[derive(Debug, Serialize, Deserialize)]
struct ChannelRecord {
    name: String,
}

#[derive(Clone)]
pub struct ChannelDirectory {
    engine: RealtimeEngine,
}

impl ChannelDirectory {
    pub fn new(engine: RealtimeEngine) -> Self {
        Self { engine }
    }

    /// Create a channel.  The name is stored trimmed.
    pub async fn create_channel(&self, name: &str) -> Result<ChannelId, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::InvalidName.into());
        }

        let id = ChannelId::new();
        let record = serde_json::json!({ "name": name });
        self.engine.write(&paths::channel(&id), record).await?;

        info!(channel = %id, name, "Channel created");
        Ok(id)
    }

    pub async fn get_channel(&self, id: &ChannelId) -> Result<Option<Channel>, ChatError> {
        let Some(value) = self.engine.get(&paths::channel(id)).await? else {
            return Ok(None);
        };
        match decode_channel(&id.to_string(), value) {
            Ok(channel) => Ok(Some(channel)),
            Err(e) => {
                warn!(error = %e, "Skipping malformed channel record");
                Ok(None)
            }
        }
    }

    /// Every well-formed channel, in creation order.
    pub async fn list_channels(&self) -> Result<Vec<Channel>, ChatError> {
        let children = self
            .engine
            .subscribe_once(paths::CHANNELS, &Query::all())
            .await?;

        Ok(children
            .into_iter()
            .filter_map(|(key, value)| match decode_channel(&key, value) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed channel record");
                    None
                }
            })
            .collect())
    }

    /// Every existing channel once, then each new one as it is created.
    pub async fn subscribe_channel_added(&self) -> Result<ChannelFeed, ChatError> {
        let inner = self.engine.subscribe(paths::CHANNELS, Query::all()).await?;
        Ok(ChannelFeed { inner })
    }
}

/// Stream of channels announced by the directory.
pub struct ChannelFeed {
    inner: Subscription,
}

impl ChannelFeed {
    pub fn lagged(&self) -> bool {
        self.inner.lagged()
    }
}

impl Stream for ChannelFeed {
    type Item = Channel;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let event = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(event)) => event,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            let ChildEvent { kind, key, value } = event;
            if kind != EventKind::Added {
                continue;
            }
            match decode_channel(&key, value) {
                Ok(channel) => return Poll::Ready(Some(channel)),
                Err(e) => warn!(error = %e, "Skipping malformed channel record"),
            }
        }
    }
}

fn decode_channel(key: &str, value: Value) -> Result<Channel, DecodeError> {
    let id = ChannelId::parse(key).map_err(|_| DecodeError::InvalidKey {
        key: key.to_string(),
    })?;
    let record: ChannelRecord = serde_json::from_value(value).map_err(|e| DecodeError::Shape {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if record.name.trim().is_empty() {
        return Err(DecodeError::BlankName {
            key: key.to_string(),
        });
    }
    Ok(Channel {
        id,
        name: record.name,
    })
}
