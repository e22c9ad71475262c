//! v001 -- Initial schema creation.
//!
//! Creates the realtime tables (`nodes`, `engine_meta`, `disconnect_ops`),
//! the media metadata table and the local identity tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Realtime nodes: one row per child of a collection path
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS nodes (
    collection TEXT NOT NULL,               -- e.g. channels/{id}/messages
    key        TEXT NOT NULL,               -- child key
    seq        INTEGER NOT NULL,            -- commit sequence of creation
    value      TEXT NOT NULL,               -- JSON
    created_at TEXT NOT NULL,               -- RFC-3339
    updated_at TEXT NOT NULL,

    PRIMARY KEY (collection, key)
);

CREATE INDEX IF NOT EXISTS idx_nodes_collection_seq
    ON nodes(collection, seq);

CREATE TABLE IF NOT EXISTS engine_meta (
    name  TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Pending on-disconnect removals, keyed by session
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS disconnect_ops (
    session_id TEXT NOT NULL,
    path       TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (session_id, path)
);

-- ----------------------------------------------------------------
-- Media metadata (bytes live on disk)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS media (
    path         TEXT PRIMARY KEY NOT NULL,  -- {userId}/{millis}/{file}
    content_type TEXT NOT NULL,
    size         INTEGER NOT NULL,
    blake3_hash  TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Local identity provider
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS accounts (
    user_id       TEXT PRIMARY KEY NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    display_name  TEXT NOT NULL,
    password_hash TEXT NOT NULL,            -- bcrypt, encoded
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS password_resets (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      TEXT NOT NULL,
    requested_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES accounts(user_id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
