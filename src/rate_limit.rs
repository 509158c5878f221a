//! Per-caller request throttling with a short burst window and a long
//! sustained window. Authenticated callers are keyed by user id, anonymous
//! ones by client IP: the peer address, or the first `X-Forwarded-For` hop
//! when the deployment says a proxy sets that header.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, FromRef, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

use crate::{
    auth::{extractors::bearer_token, jwt::JwtKeys},
    config::{RateLimitConfig, RateTier},
    state::AppState,
};

struct Window {
    count: u32,
    started: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self { count: 0, started: now }
    }

    /// Counts one hit; true while the tier's budget holds.
    fn hit(&mut self, tier: RateTier, now: Instant) -> bool {
        if now.duration_since(self.started) >= Duration::from_secs(tier.window_secs) {
            self.count = 0;
            self.started = now;
        }
        self.count += 1;
        self.count <= tier.max_requests
    }
}

struct Entry {
    burst: Window,
    sustained: Window,
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns `true` if the request is allowed.
    pub async fn check(&self, key: &str) -> bool {
        let mut map = self.inner.lock().await;
        let now = Instant::now();
        let entry = map.entry(key.to_owned()).or_insert_with(|| Entry {
            burst: Window::new(now),
            sustained: Window::new(now),
        });

        // Both windows count the hit even when one of them rejects it.
        let burst_ok = entry.burst.hit(self.config.burst, now);
        let sustained_ok = entry.sustained.hit(self.config.sustained, now);
        burst_ok && sustained_ok
    }

    /// Drops callers whose longest window has expired.
    pub async fn cleanup(&self) {
        let ttl = Duration::from_secs(
            self.config
                .burst
                .window_secs
                .max(self.config.sustained.window_secs),
        );
        let now = Instant::now();
        self.inner
            .lock()
            .await
            .retain(|_, e| now.duration_since(e.sustained.started) < ttl);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn throttle_key(state: &AppState, request: &Request) -> String {
    let user = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .and_then(|token| JwtKeys::from_ref(state).verify(token).ok());
    match user {
        Some(claims) => format!("user:{}", claims.sub),
        None => {
            let trust = state.config.rate_limit.trust_forwarded_for;
            format!("ip:{}", client_ip(request, trust))
        }
    }
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "Request was throttled." })),
    )
        .into_response()
}

pub async fn throttle(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let key = throttle_key(&state, &request);
    if !state.rate_limiter.check(&key).await {
        warn!(%key, "request throttled");
        return Err(too_many_requests());
    }
    Ok(next.run(request).await)
}
