use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, OriginalUri, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Fixed window shared by the rate limiters and the brute-force counter.
pub const WINDOW: Duration = Duration::from_secs(15 * 60);
/// Failed attempts per (IP, path) before the brute-force guard trips.
pub const BRUTE_FORCE_MAX: u64 = 10;
/// Request bodies above this are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// One route-class quota of the fixed-window limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateQuota {
    pub class: &'static str,
    pub max: u64,
    pub window: Duration,
    pub message: &'static str,
}

pub const AUTH_QUOTA: RateQuota = RateQuota {
    class: "auth",
    max: 5,
    window: WINDOW,
    message: "Too many authentication attempts. Please try again later.",
};

pub const SWAP_QUOTA: RateQuota = RateQuota {
    class: "swap",
    max: 20,
    window: WINDOW,
    message: "Too many swap requests. Please slow down.",
};

pub const GENERAL_QUOTA: RateQuota = RateQuota {
    class: "general",
    max: 100,
    window: WINDOW,
    message: "Too many requests. Please slow down.",
};

#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub count: u64,
    pub window_start: Instant,
}

/// Key -> {count, windowStart} store behind the limiter and brute-force
/// middleware. In-process by default; the interface is the seam for an
/// external cache in multi-instance deployments.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter, resetting it first if the window has elapsed.
    async fn incr(&self, key: &str, window: Duration) -> CounterSnapshot;
    /// Reads the counter without touching it; expired windows read as zero.
    async fn get(&self, key: &str, window: Duration) -> CounterSnapshot;
}

pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterSnapshot>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window: Duration) -> CounterSnapshot {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = entries
            .entry(key.to_string())
            .or_insert(CounterSnapshot {
                count: 0,
                window_start: now,
            });
        if now.duration_since(entry.window_start) > window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        *entry
    }

    async fn get(&self, key: &str, window: Duration) -> CounterSnapshot {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.window_start) <= window => *entry,
            _ => CounterSnapshot {
                count: 0,
                window_start: now,
            },
        }
    }
}

/// Client identity for counter keys: first X-Forwarded-For entry, else the
/// socket peer address.
pub fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn original_path(req: &Request) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

fn seconds_left(snapshot: &CounterSnapshot, window: Duration) -> u64 {
    window
        .saturating_sub(snapshot.window_start.elapsed())
        .as_secs_f64()
        .ceil() as u64
}

/// Fixed-window limiter for one route class.
pub async fn enforce_rate_limit(
    counters: Arc<dyn CounterStore>,
    quota: RateQuota,
    req: Request,
    next: Next,
) -> Response {
    let key = format!("rl:{}:{}", quota.class, client_ip(&req));
    let snapshot = counters.incr(&key, quota.window).await;
    if snapshot.count > quota.max {
        warn!(key = %key, count = snapshot.count, "rate limit exceeded");
        return ApiError::RateLimited {
            error: "Rate limit exceeded",
            message: quota.message,
            retry_after: seconds_left(&snapshot, quota.window),
        }
        .into_response();
    }
    next.run(req).await
}

/// Brute-force guard: blocks once the (IP, path) counter reaches the cap and
/// counts 401/403 responses on the way out.
pub async fn brute_force_guard(
    counters: Arc<dyn CounterStore>,
    req: Request,
    next: Next,
) -> Response {
    let key = format!("bf:{}:{}", client_ip(&req), original_path(&req));

    let snapshot = counters.get(&key, WINDOW).await;
    if snapshot.count >= BRUTE_FORCE_MAX {
        warn!(key = %key, count = snapshot.count, "brute force threshold reached");
        return ApiError::RateLimited {
            error: "Too many failed attempts",
            message: "Account temporarily locked. Please try again later.",
            retry_after: seconds_left(&snapshot, WINDOW),
        }
        .into_response();
    }

    let response = next.run(req).await;
    if matches!(
        response.status(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
        let snapshot = counters.incr(&key, WINDOW).await;
        debug!(key = %key, count = snapshot.count, "failed auth attempt recorded");
    }
    response
}

/// Content-Length gate; bodies without a declared length are capped later by
/// the sanitizer's read limit.
pub async fn limit_request_size(req: Request, next: Next) -> Response {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if declared > MAX_BODY_BYTES {
        return ApiError::PayloadTooLarge.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn counter_increments_within_window_and_resets_after() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_millis(40);

        assert_eq!(store.incr("k", window).await.count, 1);
        assert_eq!(store.incr("k", window).await.count, 2);
        assert_eq!(store.get("k", window).await.count, 2);
        assert_eq!(store.get("other", window).await.count, 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k", window).await.count, 0);
        assert_eq!(store.incr("k", window).await.count, 1);
    }

    fn limited_router(max: u64) -> Router {
        let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let quota = RateQuota {
            class: "test",
            max,
            window: Duration::from_secs(60),
            message: "Too many requests. Please slow down.",
        };
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(from_fn(move |req: Request, next: Next| {
                let counters = counters.clone();
                async move { enforce_rate_limit(counters, quota, req, next).await }
            }))
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_quota() {
        let app = limited_router(2);
        for _ in 0..2 {
            let res = app
                .clone()
                .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn rate_limiter_keys_on_client_ip() {
        let app = limited_router(1);
        for ip in ["10.0.0.1", "10.0.0.2"] {
            let res = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/ping")
                        .header("x-forwarded-for", ip)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "first request for {ip}");
        }
    }

    #[tokio::test]
    async fn brute_force_counts_unauthorized_responses_then_blocks() {
        let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let app = Router::new()
            .route(
                "/login",
                get(|| async { StatusCode::UNAUTHORIZED }),
            )
            .layer(from_fn({
                let counters = counters.clone();
                move |req: Request, next: Next| {
                    let counters = counters.clone();
                    async move { brute_force_guard(counters, req, next).await }
                }
            }));

        for _ in 0..BRUTE_FORCE_MAX {
            let res = app
                .clone()
                .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        let res = app
            .clone()
            .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn brute_force_ignores_successful_responses() {
        let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let app = Router::new()
            .route("/login", get(|| async { "ok" }))
            .layer(from_fn({
                let counters = counters.clone();
                move |req: Request, next: Next| {
                    let counters = counters.clone();
                    async move { brute_force_guard(counters, req, next).await }
                }
            }));

        for _ in 0..(BRUTE_FORCE_MAX + 5) {
            let res = app
                .clone()
                .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let app = Router::new()
            .route("/upload", get(|| async { "ok" }))
            .layer(from_fn(limit_request_size));

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/upload")
                    .header(header::CONTENT_LENGTH, (MAX_BODY_BYTES + 1).to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let res = app
            .oneshot(Request::builder().uri("/upload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
