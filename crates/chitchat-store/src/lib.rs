//! # chitchat-store
//!
//! Durable storage for the chat server, backed by SQLite.
//!
//! The realtime engine persists every committed child write here before it
//! notifies subscribers. The crate exposes a synchronous `Database` handle
//! that wraps a `rusqlite::Connection` and provides typed helpers for nodes,
//! pending on-disconnect operations, media metadata and local accounts.

pub mod accounts;
pub mod database;
pub mod disconnect;
pub mod media;
pub mod migrations;
pub mod models;
pub mod nodes;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
