//! Per-client throttling of mutating requests.
//!
//! Each client address owns a token bucket refilled at `rate` tokens per
//! second up to `burst`. Only POSTs spend tokens; reads and the WebSocket
//! upgrade are never throttled.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Allowance {
    tokens: f64,
    updated: Instant,
}

impl Allowance {
    /// Spend one token, or report how long until one is available.
    fn spend(&mut self, now: Instant, rate: f64, burst: f64) -> Result<(), Duration> {
        let refill = now.saturating_duration_since(self.updated).as_secs_f64() * rate;
        self.tokens = (self.tokens + refill).min(burst);
        self.updated = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / rate))
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    clients: Arc<Mutex<HashMap<IpAddr, Allowance>>>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            rate: rate.max(f64::EPSILON),
            burst: burst.max(1.0),
        }
    }

    /// `Ok` if `ip` may proceed, otherwise the wait before its next token.
    pub async fn admit(&self, ip: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        clients
            .entry(ip)
            .or_insert(Allowance {
                tokens: self.burst,
                updated: now,
            })
            .spend(now, self.rate, self.burst)
    }

    /// Forget clients idle for `max_idle` or longer.  Returns how many.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, a| now.saturating_duration_since(a.updated) < max_idle);
        let purged = before - clients.len();
        if purged > 0 {
            debug!(purged, remaining = clients.len(), "Purged idle rate limit entries");
        }
        purged
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }
    let Some(ip) = client_ip(&req) else {
        return next.run(req).await;
    };

    match limiter.admit(ip).await {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
            let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(json!({ "error": "Too many requests" })),
            )
                .into_response()
        }
    }
}

/// Peer address when the server was started with connect info, otherwise
/// the first `X-Forwarded-For` hop or `X-Real-IP`.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| forwarded_ip(req.headers()))
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header_ip = |name: &str, first_hop: bool| {
        let value = headers.get(name)?.to_str().ok()?;
        let value = if first_hop { value.split(',').next()? } else { value };
        value.trim().parse::<IpAddr>().ok()
    };
    header_ip("x-forwarded-for", true).or_else(|| header_ip("x-real-ip", false))
}
