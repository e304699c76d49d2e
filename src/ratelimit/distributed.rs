//! Distributed rate limiter using Chitchat cluster state.
//!
//! Counters live in the gossip mesh instead of process memory, so a quota is
//! shared by every node in the cluster. Nodes cannot agree on when a key's
//! first request arrived, so windows are aligned to multiples of the window
//! length since the epoch. Totals are eventually consistent: a quota can be
//! overshot by what peers admitted during the last gossip interval.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::mesh::{Cluster, CounterKey};

use super::backend::RateLimitBackend;
use super::decision::Decision;
use super::policy::RateLimitConfig;

/// A distributed rate limiter backed by Chitchat cluster state.
pub struct DistributedRateLimiter {
    /// The cluster for distributed state.
    cluster: Arc<Cluster>,
    /// Counters this node has written to and not yet removed.
    written: Mutex<HashSet<CounterKey>>,
    /// Time source.
    clock: Arc<dyn Clock>,
}

impl DistributedRateLimiter {
    /// Create a new distributed rate limiter on the system clock.
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self::with_clock(cluster, Arc::new(SystemClock))
    }

    /// Create a new distributed rate limiter on a custom clock.
    pub fn with_clock(cluster: Arc<Cluster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cluster,
            written: Mutex::new(HashSet::new()),
            clock,
        }
    }

    /// The aligned window containing `now_ms`, as its closing instant.
    fn window_reset_at(now_ms: u64, window_duration_ms: u64) -> u64 {
        let window = window_duration_ms.max(1);
        (now_ms / window) * window + window
    }

    /// Check the rate limit for a key.
    ///
    /// This method increments the counter in the cluster state and returns
    /// the decision based on the cluster-wide total.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> Decision {
        let now = self.clock.now_ms();
        let window_reset_at = Self::window_reset_at(now, config.window_duration_ms);
        let counter_key = CounterKey::new(key, window_reset_at);

        trace!(key = %key, window_reset_at = window_reset_at, "Checking distributed rate limit");

        let total = self.cluster.increment_counter(&counter_key, 1).await;
        self.written.lock().insert(counter_key);

        let decision = Decision::evaluate(total, window_reset_at, config, now);
        if decision.is_rejected() {
            debug!(
                key = %key,
                count = total,
                limit = config.max_requests,
                "Distributed rate limit exceeded"
            );
        }
        decision
    }

    /// Give back one request from this node's contribution.
    pub async fn refund(&self, key: &str, decision: &Decision) -> bool {
        if decision.window_reset_at_ms <= self.clock.now_ms() {
            return false;
        }

        let counter_key = CounterKey::new(key, decision.window_reset_at_ms);
        if !self.written.lock().contains(&counter_key) {
            return false;
        }
        self.cluster.release_counter(&counter_key, 1).await
    }

    /// Delete this node's contributions for windows that have closed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<CounterKey> = {
            let mut written = self.written.lock();
            let expired: Vec<CounterKey> = written
                .iter()
                .filter(|key| key.window_reset_at <= now)
                .cloned()
                .collect();
            for key in &expired {
                written.remove(key);
            }
            expired
        };

        self.cluster.remove_counters(&expired).await;
        expired.len()
    }

    /// Get the cluster-wide count for a key in the current window.
    pub async fn get_counter_value(&self, key: &str, config: &RateLimitConfig) -> u64 {
        let window_reset_at = Self::window_reset_at(self.clock.now_ms(), config.window_duration_ms);
        self.cluster
            .get_count(&CounterKey::new(key, window_reset_at))
            .await
    }

    /// Get the cluster.
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Get the number of live nodes in the cluster.
    pub async fn live_node_count(&self) -> usize {
        self.cluster.live_node_count().await
    }
}

#[async_trait]
impl RateLimitBackend for DistributedRateLimiter {
    fn name(&self) -> &'static str {
        "distributed"
    }

    async fn check(&self, key: &str, config: &RateLimitConfig) -> Decision {
        DistributedRateLimiter::check(self, key, config).await
    }

    async fn refund(&self, key: &str, decision: &Decision) -> bool {
        DistributedRateLimiter::refund(self, key, decision).await
    }

    async fn purge_expired(&self) -> usize {
        DistributedRateLimiter::purge_expired(self).await
    }
}
