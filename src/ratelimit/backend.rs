//! Rate limiter trait for abstracting local and distributed implementations.

use async_trait::async_trait;

use super::decision::Decision;
use super::limiter::RateLimiter;
use super::policy::RateLimitConfig;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both the in-process [`RateLimiter`] and the
/// mesh-backed `DistributedRateLimiter` so the HTTP layer and the sweeper can
/// work with either.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Count a request for `key` and decide whether it is admitted.
    async fn check(&self, key: &str, config: &RateLimitConfig) -> Decision;

    /// Uncount a request admitted by `decision`, if its window is still open.
    async fn refund(&self, key: &str, decision: &Decision) -> bool;

    /// Drop state for closed windows, returning how many counters were removed.
    async fn purge_expired(&self) -> usize;
}

#[async_trait]
impl RateLimitBackend for RateLimiter {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn check(&self, key: &str, config: &RateLimitConfig) -> Decision {
        RateLimiter::check(self, key, config)
    }

    async fn refund(&self, key: &str, decision: &Decision) -> bool {
        RateLimiter::refund(self, key, decision)
    }

    async fn purge_expired(&self) -> usize {
        RateLimiter::purge_expired(self)
    }
}
