//! Wire representation of decisions.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ratelimit::Decision;

/// Quota for the current window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window close in epoch seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Attach quota headers, plus `Retry-After` when the decision is a rejection.
pub fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));

    if let Some(retry_after) = decision.retry_after_seconds {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

/// The `429 Too Many Requests` response for a rejected request.
pub fn rejection(decision: &Decision, message: &str) -> Response {
    let body = Json(json!({
        "error": message,
        "retry_after": decision.retry_after_seconds.unwrap_or(0),
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    apply_headers(response.headers_mut(), decision);
    response
}
