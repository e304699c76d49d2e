//! Request throttling middleware for axum routers.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use tracing::{trace, warn};

use super::response::{apply_headers, rejection};
use super::state::ThrottleState;
use crate::ratelimit::{client_identity, RequestKey};

/// Throttle requests according to the policy table.
///
/// Requests on routes without a policy pass through untouched. Rejected
/// requests get a 429 without reaching the handler. Admitted requests run,
/// and are uncounted afterwards when the policy skips their outcome.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/orders", get(list_orders))
///     .layer(axum::middleware::from_fn_with_state(state.clone(), throttle));
/// ```
pub async fn throttle(State(state): State<ThrottleState>, request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    let Some((policy_name, policy)) = state.policies.resolve(&method, &path) else {
        trace!(method = %method, path = %path, "No rate limit policy for route");
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = client_from_headers(request.headers(), peer);
    let key = RequestKey::new(&client, &path).to_string_key();

    let decision = state.backend.check(&key, policy).await;

    if decision.is_rejected() {
        warn!(
            key = %key,
            policy = %policy_name,
            limit = decision.limit,
            retry_after = decision.retry_after_seconds.unwrap_or(0),
            "Request throttled"
        );
        return rejection(&decision, &policy.rejection_message);
    }

    let mut response = next.run(request).await;

    let succeeded = response.status().as_u16() < 400;
    if policy.should_refund(succeeded) && state.backend.refund(&key, &decision).await {
        trace!(key = %key, succeeded = succeeded, "Uncounted request by outcome");
    }

    apply_headers(response.headers_mut(), &decision);
    response
}

fn client_from_headers(headers: &HeaderMap, peer: Option<std::net::IpAddr>) -> String {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    client_identity(header("x-forwarded-for"), header("x-real-ip"), peer)
}
