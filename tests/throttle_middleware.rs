use axum::body::Body;
use axum::http::{header::RETRY_AFTER, Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

use turnstile::clock::ManualClock;
use turnstile::http::{throttle, ThrottleState, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
use turnstile::ratelimit::{PolicyTable, RateLimiter};

const START: u64 = 1_700_000_000_000;

const POLICIES: &str = r#"
policies:
  orders:
    window_duration_ms: 60000
    max_requests: 2
    rejection_message: Order quota exhausted
  login:
    window_duration_ms: 60000
    max_requests: 2
    skip_successful_requests: true
  uploads:
    window_duration_ms: 60000
    max_requests: 2
    skip_failed_requests: true
routes:
  - path_prefix: /orders
    policy: orders
  - path_prefix: /login
    policy: login
  - path_prefix: /uploads
    policy: uploads
"#;

fn app() -> (Router, Arc<RateLimiter>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
    let policies = PolicyTable::from_yaml(POLICIES).unwrap();
    let state = ThrottleState::new(limiter.clone(), policies);

    let router = Router::new()
        .route("/orders", get(|| async { "orders" }))
        .route("/login", post(login))
        .route("/uploads", post(|| async { StatusCode::BAD_REQUEST }))
        .route("/health", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn_with_state(state, throttle));

    (router, limiter, clock)
}

async fn login(body: String) -> StatusCode {
    if body == "correct" {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

fn request(method: &str, uri: &str, client: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn admits_then_rejects_with_headers() {
    let (app, _, _) = app();

    for remaining in ["1", "0"] {
        let response = app
            .clone()
            .oneshot(request("GET", "/orders", "10.0.0.1", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "2");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], remaining);
    }

    let response = app
        .clone()
        .oneshot(request("GET", "/orders", "10.0.0.1", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[RETRY_AFTER], "60");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Order quota exhausted");
    assert_eq!(json["retry_after"], 60);
}

#[tokio::test]
async fn clients_are_isolated() {
    let (app, _, _) = app();

    for _ in 0..3 {
        app.clone()
            .oneshot(request("GET", "/orders", "10.0.0.1", ""))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(request("GET", "/orders", "10.0.0.2", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "1");
}

#[tokio::test]
async fn window_rollover_readmits() {
    let (app, _, clock) = app();

    for _ in 0..3 {
        app.clone()
            .oneshot(request("GET", "/orders", "10.0.0.1", ""))
            .await
            .unwrap();
    }

    clock.advance(60_000);
    let response = app
        .oneshot(request("GET", "/orders", "10.0.0.1", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unthrottled_routes_pass_through() {
    let (app, limiter, _) = app();

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(request("GET", "/health", "10.0.0.1", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_RATELIMIT_LIMIT).is_none());
    }
    assert!(limiter.is_empty());
}

#[tokio::test]
async fn successful_requests_are_uncounted_when_skipped() {
    let (app, limiter, _) = app();

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(request("POST", "/login", "10.0.0.1", "correct"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(limiter.entry("10.0.0.1:/login").unwrap().count, 0);

    // Failures still count.
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("POST", "/login", "10.0.0.1", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = app
        .oneshot(request("POST", "/login", "10.0.0.1", "wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn failed_requests_are_uncounted_when_skipped() {
    let (app, limiter, _) = app();

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(request("POST", "/uploads", "10.0.0.1", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(limiter.entry("10.0.0.1:/uploads").unwrap().count, 0);
}

#[tokio::test]
async fn unidentified_callers_share_a_bucket() {
    let (app, limiter, _) = app();

    let anonymous = || {
        Request::builder()
            .uri("/orders")
            .body(Body::empty())
            .unwrap()
    };

    app.clone().oneshot(anonymous()).await.unwrap();
    app.clone().oneshot(anonymous()).await.unwrap();
    let response = app.oneshot(anonymous()).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limiter.entry("unknown:/orders").unwrap().count, 3);
}
