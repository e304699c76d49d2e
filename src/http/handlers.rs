//! Decision service endpoints.
//!
//! These let out-of-process callers (proxies, services in other languages)
//! ask for a decision before serving a request.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::error::{ApiError, ApiResult};
use super::response::apply_headers;
use super::state::ThrottleState;
use crate::ratelimit::{Decision, RateLimitConfig, RequestKey};

/// Body of `POST /v1/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Caller identity; blank callers share the `unknown` bucket
    #[serde(default)]
    pub client: String,
    /// Route being accessed
    pub route: String,
    /// HTTP method used for policy resolution
    #[serde(default = "default_method")]
    pub method: String,
    /// Explicit policy name, bypassing route resolution
    #[serde(default)]
    pub policy: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Body of the `POST /v1/check` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Name of the policy that was applied
    pub policy: String,
    /// The decision
    #[serde(flatten)]
    pub decision: Decision,
    /// Rejection message, present only when throttled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Check and count one request.
///
/// Answers 200 when admitted and 429 when throttled, with quota headers either way.
#[instrument(skip_all, fields(client = %request.client, route = %request.route))]
pub async fn check(
    State(state): State<ThrottleState>,
    Json(request): Json<CheckRequest>,
) -> ApiResult<Response> {
    if request.route.trim().is_empty() {
        return Err(ApiError::InvalidRequest("route is required".to_string()));
    }

    let (policy_name, policy) = match &request.policy {
        Some(name) => state
            .policies
            .named(name)
            .ok_or_else(|| ApiError::PolicyNotFound(name.clone()))?,
        None => state
            .policies
            .resolve(&request.method, &request.route)
            .ok_or_else(|| ApiError::NoMatchingPolicy {
                method: request.method.clone(),
                route: request.route.clone(),
            })?,
    };

    let key = RequestKey::new(&request.client, &request.route);
    let decision = state.backend.check(&key.to_string_key(), policy).await;

    debug!(
        key = %key,
        policy = %policy_name,
        admitted = decision.admitted,
        remaining = decision.remaining,
        "Rate limit decision made"
    );

    Ok(decision_response(policy_name, policy, decision))
}

fn decision_response(policy_name: &str, policy: &RateLimitConfig, decision: Decision) -> Response {
    let status = if decision.admitted {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let message = decision
        .is_rejected()
        .then(|| policy.rejection_message.clone());

    let mut headers = axum::http::HeaderMap::new();
    apply_headers(&mut headers, &decision);

    let body = CheckResponse {
        policy: policy_name.to_string(),
        decision,
        message,
    };

    (status, headers, Json(body)).into_response()
}

/// List the configured policies.
pub async fn policies(State(state): State<ThrottleState>) -> Json<BTreeMap<String, RateLimitConfig>> {
    Json(state.policies.policies.clone())
}

/// Liveness probe.
pub async fn health(State(state): State<ThrottleState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backend": state.backend.name(),
    }))
}
