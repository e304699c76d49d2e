//! HTTP server implementation.

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::handlers;
use super::state::ThrottleState;
use crate::error::{Result, TurnstileError};

/// Build the decision service router.
pub fn router(state: ThrottleState) -> Router {
    Router::new()
        .route("/v1/check", post(handlers::check))
        .route("/v1/policies", get(handlers::policies))
        .route("/healthz", get(handlers::health))
        .with_state(state)
}

/// HTTP server for the decision service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared limiter state
    state: ThrottleState,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: ThrottleState) -> Self {
        Self { addr, state }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            backend = self.state.backend.name(),
            "Starting HTTP decision service with graceful shutdown"
        );

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TurnstileError::Server(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{PolicyTable, RateLimiter};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let state = ThrottleState::new(Arc::new(RateLimiter::new()), PolicyTable::standard());
        let server = HttpServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), state);

        server.serve_with_shutdown(async {}).await.unwrap();
    }
}
