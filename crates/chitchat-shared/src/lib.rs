//! # chitchat-shared
//!
//! Types shared between the chat server and its clients: identifiers,
//! channel and message models, the persisted path layout, the WebSocket wire
//! protocol and the event-applying client caches.

pub mod cache;
pub mod constants;
pub mod error;
pub mod models;
pub mod paths;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use models::{Channel, EventKind, Message, MessagePayload, PhotoRef};
pub use types::{ChannelId, MessageId, UserId};
