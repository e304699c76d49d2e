//! Shared state for the HTTP layer.

use std::sync::Arc;

use crate::ratelimit::{PolicyTable, RateLimitBackend};

/// Counter store and policies shared by the middleware and handlers.
#[derive(Clone)]
pub struct ThrottleState {
    /// The counter store
    pub backend: Arc<dyn RateLimitBackend>,
    /// Route policies
    pub policies: Arc<PolicyTable>,
}

impl ThrottleState {
    pub fn new(backend: Arc<dyn RateLimitBackend>, policies: PolicyTable) -> Self {
        Self {
            backend,
            policies: Arc::new(policies),
        }
    }
}
