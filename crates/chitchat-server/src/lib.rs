//! # chitchat-server
//!
//! Realtime chat backend.
//!
//! - **Fan-out engine** (`realtime`): durable collections of JSON children
//!   with ordered, filtered change streams and session-scoped cleanups
//! - **Chat components**: channel directory, per-channel message log,
//!   typing indicator
//! - **Media store** for photo blobs referenced by `gs://` URLs, and the photo
//!   pipeline that ties it to the log
//! - **Identity provider** with a local SQLite implementation
//! - **HTTP API and WebSocket gateway** (axum) with per-IP rate limiting

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod media_store;
pub mod message_log;
pub mod photo;
pub mod presence;
pub mod query;
pub mod rate_limit;
pub mod realtime;
pub mod session;

use std::sync::Arc;
use std::time::Instant;

use chitchat_store::{Database, StoreError};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::directory::ChannelDirectory;
use crate::identity::LocalIdentityProvider;
use crate::media_store::MediaStore;
use crate::message_log::{LogPolicy, MessageLog};
use crate::photo::PhotoPipeline;
use crate::presence::PresenceTracker;
use crate::rate_limit::RateLimiter;
use crate::realtime::{EngineConfig, RealtimeEngine};

/// Open the configured database and wire every component together.
pub async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    let open = || -> Result<Database, StoreError> {
        match &config.database_path {
            Some(path) => Database::open_at(path),
            None => Database::new(),
        }
    };
    let (engine_db, media_db, identity_db) = (open()?, open()?, open()?);
    assemble(config, engine_db, media_db, identity_db).await
}

/// Same wiring on private in-memory databases.
pub async fn build_state_in_memory(config: ServerConfig) -> anyhow::Result<AppState> {
    assemble(
        config,
        Database::open_in_memory()?,
        Database::open_in_memory()?,
        Database::open_in_memory()?,
    )
    .await
}

async fn assemble(
    config: ServerConfig,
    engine_db: Database,
    media_db: Database,
    identity_db: Database,
) -> anyhow::Result<AppState> {
    let engine = RealtimeEngine::open(
        engine_db,
        EngineConfig {
            subscriber_buffer: config.subscriber_buffer,
        },
    )?;

    let media = MediaStore::new(
        media_db,
        config.media_storage_path.clone(),
        config.media_bucket.clone(),
        config.max_media_size,
    )
    .await?;

    let log = MessageLog::new(
        engine.clone(),
        LogPolicy {
            enforce_single_attach: config.enforce_single_attach,
        },
    );

    Ok(AppState {
        directory: ChannelDirectory::new(engine.clone()),
        presence: PresenceTracker::new(engine.clone()),
        photos: PhotoPipeline::new(log.clone(), media.clone()),
        identity: LocalIdentityProvider::shared(identity_db, config.bcrypt_cost),
        rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
        config: Arc::new(config),
        started_at: Instant::now(),
        engine,
        log,
        media,
    })
}
