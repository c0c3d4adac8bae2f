use std::net::SocketAddr;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn, Next},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::security::{self, limits, sanitize};
use crate::state::AppState;
use crate::{auth, swaps};

pub fn build_app(state: AppState) -> Router {
    let counters = state.counters.clone();

    let auth_api = auth::router()
        .layer(from_fn({
            let counters = counters.clone();
            move |req: Request, next: Next| {
                let counters = counters.clone();
                async move { limits::brute_force_guard(counters, req, next).await }
            }
        }))
        .layer(from_fn({
            let counters = counters.clone();
            move |req: Request, next: Next| {
                let counters = counters.clone();
                async move { limits::enforce_rate_limit(counters, limits::AUTH_QUOTA, req, next).await }
            }
        }));

    let swaps_api = swaps::router().layer(from_fn({
        let counters = counters.clone();
        move |req: Request, next: Next| {
            let counters = counters.clone();
            async move { limits::enforce_rate_limit(counters, limits::SWAP_QUOTA, req, next).await }
        }
    }));

    let api = Router::new()
        .nest("/auth", auth_api)
        .nest("/swaps", swaps_api)
        .merge(auth::profile_router())
        .layer(from_fn({
            let counters = counters.clone();
            move |req: Request, next: Next| {
                let counters = counters.clone();
                async move {
                    limits::enforce_rate_limit(counters, limits::GENERAL_QUOTA, req, next).await
                }
            }
        }));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .layer(from_fn(limits::limit_request_size))
        .layer(from_fn(sanitize::sanitize_query))
        .layer(from_fn(sanitize::sanitize_body))
        .layer(from_fn(security::security_headers))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let request_id = Uuid::new_v4();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        %request_id,
                        status = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    match &config.allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true)
        }
        None => CorsLayer::permissive(),
    }
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Skill Swap API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now_rfc3339(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "timestamp": now_rfc3339(),
    }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found", "Endpoint not found".into())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        build_app(AppState::fake())
    }

    async fn json_body(res: axum::http::Response<Body>) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn root_and_health_report_service_info() {
        let app = app();
        let res = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["message"], "Skill Swap API is running");

        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime"].as_f64().is_some());
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let res = app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = json_body(res).await;
        assert_eq!(body["error"], "Not found");
        assert_eq!(body["message"], "Endpoint not found");
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let res = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert_eq!(res.headers()["x-frame-options"], "DENY");
    }

    #[tokio::test]
    async fn register_login_profile_through_full_stack() {
        let app = app();

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/register",
                r#"{"username":"alice","email":"alice@example.com","password":"Passw0rd!"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert_eq!(body["user"]["email"], "alice@example.com");

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                r#"{"email":"alice@example.com","password":"Passw0rd!"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let token = body["token"].as_str().unwrap().to_string();

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/profile")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["username"], "alice");

        // no token -> 401, garbage token -> 403
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/profile")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/profile")
                    .header(header::AUTHORIZATION, "Bearer not.a.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn auth_rate_limit_trips_on_sixth_attempt() {
        let app = app();
        for _ in 0..5 {
            let res = app
                .clone()
                .oneshot(post_json(
                    "/api/auth/login",
                    r#"{"email":"ghost@example.com","password":"Nope1234!"}"#,
                ))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
        let res = app
            .oneshot(post_json(
                "/api/auth/login",
                r#"{"email":"ghost@example.com","password":"Nope1234!"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(res).await;
        assert_eq!(body["error"], "Rate limit exceeded");
        assert!(body["retryAfter"].as_u64().is_some());
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let res = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, (2 * 1024 * 1024).to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn body_sanitizer_rewrites_stored_strings() {
        let app = app();
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/register",
                r#"{"username":"<script>bob</script>","email":"bob@example.com","password":"Passw0rd!"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert_eq!(body["user"]["username"], "bob");
    }
}
