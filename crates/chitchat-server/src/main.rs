//! # chitchat-server
//!
//! Realtime chat backend binary.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, channels, messages and media
//! - **WebSocket gateway** streaming channel, message and typing events
//! - **Heartbeat reaper** that ends silent sessions and clears their typing
//!   indicators
//! - **Per-IP rate limiting** on mutating requests

use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use chitchat_server::{api, build_state, config::ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chitchat_server=debug")),
        )
        .init();

    info!("Starting ChitChat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        enforce_single_attach = config.enforce_single_attach,
        admin_enabled = config.admin_token.is_some(),
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems (database, engine, media store, identity)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let heartbeat_interval = config.heartbeat_interval;
    let heartbeat_timeout = config.heartbeat_timeout;

    let app_state = build_state(config).await?;

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Heartbeat reaper and subscriber sweep
    let engine = app_state.engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            let reaped = engine.reap_expired(heartbeat_timeout).await;
            let pruned = engine.prune_closed().await;
            if !reaped.is_empty() || pruned > 0 {
                debug!(reaped = reaped.len(), pruned, "Engine sweep");
            }
        }
    });

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
