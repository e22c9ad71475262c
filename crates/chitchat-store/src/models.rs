//! Records persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One child of a realtime collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Collection path, e.g. `channels/{id}/messages`.
    pub collection: String,
    /// Child key inside the collection.
    pub key: String,
    /// Commit sequence number of the write that created the child. Replays
    /// are ordered by this.
    pub seq: i64,
    /// Stored JSON value.
    pub value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Disconnect op
// ---------------------------------------------------------------------------

/// A removal registered by a session, to run when that session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectOp {
    pub session_id: String,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Metadata for a stored media blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRecord {
    /// Storage path, relative to the media root.
    pub path: String,
    pub content_type: String,
    pub size: i64,
    /// BLAKE3 content hash (hex string).
    pub blake3_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A local identity-provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    /// Encoded bcrypt hash (`$2b$...`), salt and cost included.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
