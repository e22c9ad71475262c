use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, HeaderMap, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use chitchat_shared::constants::{DEFAULT_RECENT_LIMIT, PROTOCOL_VERSION};
use chitchat_shared::{Channel, ChannelId, Message, MessageId};

use crate::config::ServerConfig;
use crate::directory::ChannelDirectory;
use crate::error::{AuthError, ChatError, ServerError, WriteError};
use crate::gateway::realtime_handler;
use crate::identity::{AuthenticatedUser, IdentityProvider, SignInOutcome};
use crate::media_store::{media_path, MediaStore, StoredMedia};
use crate::message_log::MessageLog;
use crate::photo::{PhotoPipeline, PhotoUpload};
use crate::presence::PresenceTracker;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::realtime::{EngineStats, RealtimeEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: RealtimeEngine,
    pub directory: ChannelDirectory,
    pub log: MessageLog,
    pub presence: PresenceTracker,
    pub media: MediaStore,
    pub photos: PhotoPipeline,
    pub identity: Arc<dyn IdentityProvider>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // multipart framing on top of the largest accepted blob
    let body_limit = state.config.max_media_size + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/status", get(admin_status))
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/signout", post(sign_out))
        .route("/auth/reset", post(password_reset))
        .route("/auth/profile", post(update_profile))
        .route("/channels", get(list_channels).post(create_channel))
        .route(
            "/channels/:id/messages",
            get(recent_messages).post(send_text),
        )
        .route("/channels/:id/photos", post(send_photo))
        .route("/media/upload", post(media_upload))
        .route("/media", get(media_download))
        .route("/realtime", get(realtime_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Authentication ───

/// The signed-in caller, from `Authorization: Bearer <token>`.
pub struct CurrentUser {
    pub user: AuthenticatedUser,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or(ServerError::Auth(AuthError::InvalidToken))?
            .to_string();
        let user = state.identity.resolve(&token).await?;
        Ok(Self { user, token })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ─── Responses ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol: &'static str,
    media_bucket: String,
    max_media_size: usize,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    uptime_secs: u64,
    engine: EngineStats,
    enforce_single_attach: bool,
}

#[derive(Serialize)]
struct MessageCreated {
    channel_id: ChannelId,
    message_id: MessageId,
}

#[derive(Serialize)]
struct PhotoSent {
    channel_id: ChannelId,
    message_id: MessageId,
    url: String,
    content_type: String,
}

// ─── Requests ───

#[derive(Deserialize)]
struct SignUpRequest {
    email: String,
    password: String,
    display_name: String,
}

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct ResetRequest {
    email: String,
}

#[derive(Deserialize)]
struct ProfileRequest {
    display_name: String,
}

#[derive(Deserialize)]
struct CreateChannelRequest {
    name: String,
}

#[derive(Deserialize)]
struct SendTextRequest {
    text: String,
}

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct MediaParams {
    url: String,
}

// ─── Handlers ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        media_bucket: state.media.bucket().to_string(),
        max_media_size: state.media.max_size(),
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        engine: state.engine.stats().await,
        enforce_single_attach: state.log.policy().enforce_single_attach,
    }))
}

async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<SignInOutcome>, ServerError> {
    state
        .identity
        .sign_up(&req.email, &req.password, &req.display_name)
        .await?;
    let outcome = state.identity.sign_in(&req.email, &req.password).await?;
    Ok(Json(outcome))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SignInOutcome>, ServerError> {
    let outcome = state.identity.sign_in(&req.email, &req.password).await?;
    Ok(Json(outcome))
}

async fn sign_out(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.identity.sign_out(&caller.token).await?;
    Ok(Json(serde_json::json!({ "signed_out": true })))
}

async fn password_reset(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.identity.send_password_reset(&req.email).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

async fn update_profile(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<AuthenticatedUser>, ServerError> {
    state
        .identity
        .update_display_name(&caller.user.user_id, &req.display_name)
        .await?;
    let user = state.identity.resolve(&caller.token).await?;
    Ok(Json(user))
}

async fn list_channels(
    State(state): State<AppState>,
    _caller: CurrentUser,
) -> Result<Json<Vec<Channel>>, ServerError> {
    Ok(Json(state.directory.list_channels().await?))
}

async fn create_channel(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<Channel>, ServerError> {
    let id = state.directory.create_channel(&req.name).await?;
    let channel = state
        .directory
        .get_channel(&id)
        .await?
        .ok_or_else(|| ChatError::Write(WriteError::NotFound(id.to_string())))?;
    info!(channel = %id, user = %caller.user.user_id, "Channel created via API");
    Ok(Json(channel))
}

fn parse_channel_id(raw: &str) -> Result<ChannelId, ServerError> {
    ChannelId::parse(raw).map_err(|_| ServerError::BadRequest(format!("Invalid channel id: {raw}")))
}

async fn recent_messages(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(id): Path<String>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let channel = parse_channel_id(&id)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(state.config.recent_limit_max);
    Ok(Json(state.log.recent(&channel, limit).await?))
}

async fn send_text(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> Result<Json<MessageCreated>, ServerError> {
    let channel = parse_channel_id(&id)?;
    let message_id = state
        .log
        .append_text(
            &channel,
            &caller.user.user_id,
            &caller.user.display_name,
            &req.text,
        )
        .await?;
    Ok(Json(MessageCreated {
        channel_id: channel,
        message_id,
    }))
}

/// Read the `file` field of a multipart form.
async fn read_file_field(mut multipart: Multipart) -> Result<PhotoUpload, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
        return Ok(PhotoUpload {
            bytes: bytes.to_vec(),
            content_type,
            filename,
        });
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn send_photo(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<PhotoSent>, ServerError> {
    let channel = parse_channel_id(&id)?;
    let upload = read_file_field(multipart).await?;
    let sent = state
        .photos
        .send_photo(
            &channel,
            &caller.user.user_id,
            Some(&caller.user.display_name),
            upload,
        )
        .await?;
    Ok(Json(PhotoSent {
        channel_id: channel,
        message_id: sent.message_id,
        url: sent.media.url,
        content_type: sent.media.content_type,
    }))
}

async fn media_upload(
    State(state): State<AppState>,
    caller: CurrentUser,
    multipart: Multipart,
) -> Result<Json<StoredMedia>, ServerError> {
    let upload = read_file_field(multipart).await?;
    let path = media_path(
        &caller.user.user_id,
        Utc::now().timestamp_millis(),
        upload.filename.as_deref(),
    );
    let stored = state
        .media
        .upload(&path, &upload.bytes, upload.content_type.as_deref().unwrap_or(""))
        .await?;

    info!(path = %stored.path, size = stored.size, "Media uploaded via API");
    Ok(Json(stored))
}

async fn media_download(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Query(params): Query<MediaParams>,
) -> Result<Response, ServerError> {
    let media = state.media.download(&params.url).await?;
    let kind = match media.kind {
        crate::media_store::MediaKind::Animated => "animated",
        crate::media_store::MediaKind::Still => "still",
    };
    Ok((
        [
            (header::CONTENT_TYPE, media.content_type),
            (header::HeaderName::from_static("x-media-kind"), kind.to_string()),
        ],
        media.bytes,
    )
        .into_response())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app(config: ServerConfig) -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            media_storage_path: dir.path().join("media"),
            bcrypt_cost: 4,
            ..config
        };
        let state = crate::build_state_in_memory(config).await.unwrap();
        (build_router(state), dir)
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn sign_up_token(app: &Router) -> String {
        let (status, body) = call(
            app,
            post_json(
                "/auth/signup",
                None,
                json!({"email": "ada@example.com", "password": "hunter22", "display_name": "Ada"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = test_app(ServerConfig::default()).await;
        let (status, body) = call(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_channel_and_message_flow() {
        let (app, _dir) = test_app(ServerConfig::default()).await;
        let token = sign_up_token(&app).await;

        let (status, channel) =
            call(&app, post_json("/channels", Some(&token), json!({"name": " ch1 "}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(channel["name"], "ch1");
        let id = channel["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            post_json(&format!("/channels/{id}/messages"), Some(&token), json!({"text": "m1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, messages) =
            call(&app, get_with(&format!("/channels/{id}/messages?limit=10"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(messages[0]["payload"]["text"], "m1");
        assert_eq!(messages[0]["sender_name"], "Ada");

        let (_, channels) = call(&app, get_with("/channels", &token)).await;
        assert_eq!(channels.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_errors_map_to_status() {
        let (app, _dir) = test_app(ServerConfig::default()).await;
        let token = sign_up_token(&app).await;

        let (status, body) =
            call(&app, post_json("/channels", Some(&token), json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Channel name must not be empty");

        let unknown = ChannelId::new();
        let (status, _) = call(
            &app,
            post_json(&format!("/channels/{unknown}/messages"), Some(&token), json!({"text": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, post_json("/channels", None, json!({"name": "x"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            post_json("/auth/signin", None, json!({"email": "ada@example.com", "password": "wrongpass"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body["error"],
            "The password is invalid or the user does not have a password."
        );
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let (app, _dir) = test_app(ServerConfig {
            admin_token: Some("s3cret".into()),
            ..ServerConfig::default()
        })
        .await;

        let (status, _) = call(&app, get_with("/admin/status", "wrong")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, get_with("/admin/status", "s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["engine"]["sessions"], 0);
    }

    #[tokio::test]
    async fn test_photo_upload_and_download() {
        let (app, _dir) = test_app(ServerConfig::default()).await;
        let token = sign_up_token(&app).await;
        let (_, channel) =
            call(&app, post_json("/channels", Some(&token), json!({"name": "pics"}))).await;
        let id = channel["id"].as_str().unwrap();

        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cat.gif\"\r\n\
             Content-Type: image/gif\r\n\r\nGIF89a\r\n--{boundary}--\r\n"
        );
        let req = Request::post(format!("/channels/{id}/photos"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, sent) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let url = sent["url"].as_str().unwrap();
        assert!(url.starts_with("gs://chitchat-media/"));
        assert!(url.ends_with("/cat.gif"));

        let resp = app
            .clone()
            .oneshot(get_with(&format!("/media?url={url}"), &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/gif");
        assert_eq!(resp.headers()["x-media-kind"], "animated");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"GIF89a");
    }
}
