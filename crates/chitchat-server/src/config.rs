//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. Invalid values are logged and the
//! default is kept.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chitchat_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MEDIA_BUCKET, DEFAULT_RECENT_LIMIT, MAX_MEDIA_SIZE,
};

const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (`chitchat.db`).
    pub database_path: Option<PathBuf>,

    /// Filesystem root for uploaded media.
    /// Env: `MEDIA_STORAGE_PATH`
    /// Default: `./media`
    pub media_storage_path: PathBuf,

    /// Bucket name used in `gs://{bucket}/{path}` media URLs.
    /// Env: `MEDIA_BUCKET`
    pub media_bucket: String,

    /// Maximum media blob size in bytes.
    /// Env: `MAX_MEDIA_SIZE`
    pub max_media_size: usize,

    /// How often the WebSocket gateway pings and the reaper runs.
    /// Env: `HEARTBEAT_INTERVAL_SECS`
    pub heartbeat_interval: Duration,

    /// Sessions silent for longer than this are ended.
    /// Env: `HEARTBEAT_TIMEOUT_SECS`
    pub heartbeat_timeout: Duration,

    /// Queued live events per subscriber before it is dropped as lagged.
    /// Env: `SUBSCRIBER_BUFFER`
    pub subscriber_buffer: usize,

    /// Upper bound for the `limit` of a message history request.
    /// Env: `RECENT_LIMIT_MAX`
    pub recent_limit_max: usize,

    /// Reject attaching a second URL to a photo message.
    /// Env: `ENFORCE_SINGLE_ATTACH` (true/false)
    pub enforce_single_attach: bool,

    /// Requests per second refilled into each client's bucket.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst size of each client's bucket.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// bcrypt work factor for local account passwords (4..=31).
    /// Env: `BCRYPT_COST`
    pub bcrypt_cost: u32,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            media_storage_path: PathBuf::from("./media"),
            media_bucket: DEFAULT_MEDIA_BUCKET.to_string(),
            max_media_size: MAX_MEDIA_SIZE,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            subscriber_buffer: 1024,
            recent_limit_max: 500,
            enforce_single_attach: true,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            instance_name: "ChitChat".to_string(),
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        parse_into(&var, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = var("MEDIA_STORAGE_PATH").filter(|p| !p.is_empty()) {
            config.media_storage_path = PathBuf::from(path);
        }

        if let Some(bucket) = var("MEDIA_BUCKET") {
            if bucket.is_empty() || bucket.contains('/') {
                tracing::warn!(value = %bucket, "Invalid MEDIA_BUCKET, using default");
            } else {
                config.media_bucket = bucket;
            }
        }

        parse_into(&var, "MAX_MEDIA_SIZE", &mut config.max_media_size);

        let mut secs = config.heartbeat_interval.as_secs();
        parse_into(&var, "HEARTBEAT_INTERVAL_SECS", &mut secs);
        config.heartbeat_interval = Duration::from_secs(secs.max(1));

        let mut secs = config.heartbeat_timeout.as_secs();
        parse_into(&var, "HEARTBEAT_TIMEOUT_SECS", &mut secs);
        config.heartbeat_timeout = Duration::from_secs(secs.max(1));

        if config.heartbeat_timeout <= config.heartbeat_interval {
            tracing::warn!(
                interval = config.heartbeat_interval.as_secs(),
                timeout = config.heartbeat_timeout.as_secs(),
                "Heartbeat timeout not above interval, raising it"
            );
            config.heartbeat_timeout = config.heartbeat_interval * 3;
        }

        parse_into(&var, "SUBSCRIBER_BUFFER", &mut config.subscriber_buffer);
        config.subscriber_buffer = config.subscriber_buffer.max(1);

        parse_into(&var, "RECENT_LIMIT_MAX", &mut config.recent_limit_max);
        config.recent_limit_max = config.recent_limit_max.max(DEFAULT_RECENT_LIMIT);

        if let Some(val) = var("ENFORCE_SINGLE_ATTACH") {
            config.enforce_single_attach = val != "false" && val != "0";
        }

        parse_into(&var, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&var, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);

        let mut cost = config.bcrypt_cost;
        parse_into(&var, "BCRYPT_COST", &mut cost);
        if (MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
            config.bcrypt_cost = cost;
        } else {
            tracing::warn!(value = cost, "BCRYPT_COST out of range, using default");
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<F, T>(var: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_vars(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.enforce_single_attach);
        assert_eq!(config.media_bucket, "chitchat-media");
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("MEDIA_BUCKET", "pics"),
            ("HEARTBEAT_INTERVAL_SECS", "5"),
            ("HEARTBEAT_TIMEOUT_SECS", "20"),
            ("ENFORCE_SINGLE_ATTACH", "false"),
            ("ADMIN_TOKEN", "s3cret"),
            ("DATABASE_PATH", "/tmp/chat.db"),
            ("BCRYPT_COST", "10"),
        ]);
        assert_eq!(config.bcrypt_cost, 10);
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.media_bucket, "pics");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(20));
        assert!(!config.enforce_single_attach);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/chat.db")));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_map(&[
            ("HTTP_ADDR", "nope"),
            ("MAX_MEDIA_SIZE", "-1"),
            ("MEDIA_BUCKET", "a/b"),
            ("SUBSCRIBER_BUFFER", "0"),
            ("ADMIN_TOKEN", ""),
            ("BCRYPT_COST", "2"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.max_media_size, defaults.max_media_size);
        assert_eq!(config.media_bucket, defaults.media_bucket);
        assert_eq!(config.subscriber_buffer, 1);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_timeout_raised_above_interval() {
        let config = from_map(&[
            ("HEARTBEAT_INTERVAL_SECS", "10"),
            ("HEARTBEAT_TIMEOUT_SECS", "10"),
        ]);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
    }
}
