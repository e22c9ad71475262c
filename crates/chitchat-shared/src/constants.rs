/// Protocol version reported by `/info` and the WebSocket greeting
pub const PROTOCOL_VERSION: &str = "/chitchat/1.0.0";

/// Application name
pub const APP_NAME: &str = "ChitChat";

/// Placeholder written into a photo message before its upload finishes
pub const PHOTO_URL_NOT_SET: &str = "NOTSET";

/// URL scheme of media references stored in photo messages
pub const MEDIA_URL_SCHEME: &str = "gs://";

/// Default media bucket name
pub const DEFAULT_MEDIA_BUCKET: &str = "chitchat-media";

/// Content type that consumers must decode as an animated sequence
pub const ANIMATED_CONTENT_TYPE: &str = "image/gif";

/// Content type used when a still photo is uploaded without one
pub const DEFAULT_PHOTO_CONTENT_TYPE: &str = "image/jpeg";

/// Number of recent messages a thread view replays on open
pub const DEFAULT_RECENT_LIMIT: usize = 25;

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 6;

/// Maximum media blob size in bytes (20 MiB)
pub const MAX_MEDIA_SIZE: usize = 20 * 1024 * 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
