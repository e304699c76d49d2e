//! In-process fixed-window rate limiter.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

use super::decision::Decision;
use super::entry::RateLimitEntry;
use super::policy::RateLimitConfig;

/// The in-process rate limiter that owns all window counters.
///
/// Each key is updated under its map shard lock, so the read, increment and
/// decide steps of [`RateLimiter::check`] are atomic per key. The limiter is
/// cheap to share behind an `Arc`.
///
/// Windows are fixed: a window opens on the first request for a key and
/// closes `window_duration_ms` later. A burst straddling a boundary can
/// therefore admit up to twice the quota within one window length.
pub struct RateLimiter {
    /// Window counters indexed by request key
    entries: DashMap<String, RateLimitEntry>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a rate limiter on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Count a request for `key` and decide whether it is admitted.
    ///
    /// A missing or expired entry opens a fresh window holding this request.
    /// Otherwise the counter is incremented and compared to the quota.
    pub fn check(&self, key: &str, config: &RateLimitConfig) -> Decision {
        let now = self.clock.now_ms();

        let entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = RateLimitEntry::open(now, config.window_duration_ms);
                    debug!(key = %key, reset_at = entry.window_reset_at, "Rolled over rate limit window");
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
                *entry
            }
            Entry::Vacant(vacant) => {
                let entry = RateLimitEntry::open(now, config.window_duration_ms);
                debug!(
                    key = %key,
                    limit = config.max_requests,
                    window_ms = config.window_duration_ms,
                    "Creating new rate limit entry"
                );
                *vacant.insert(entry)
            }
        };

        trace!(key = %key, count = entry.count, limit = config.max_requests, "Checked rate limit");

        Decision::from_entry(&entry, config, now)
    }

    /// Give back one request counted by `decision`.
    ///
    /// Only applies while the key is still in the window that produced the
    /// decision; a later window or a swept entry is left alone. Returns
    /// whether a request was uncounted.
    pub fn refund(&self, key: &str, decision: &Decision) -> bool {
        let now = self.clock.now_ms();

        match self.entries.get_mut(key) {
            Some(mut entry)
                if entry.window_reset_at == decision.window_reset_at_ms
                    && !entry.is_expired(now)
                    && entry.count > 0 =>
            {
                entry.count -= 1;
                trace!(key = %key, count = entry.count, "Refunded rate limit hit");
                true
            }
            _ => false,
        }
    }

    /// Remove every entry whose window has closed.
    ///
    /// Returns the number of entries removed. Live entries are never touched,
    /// so repeated sweeps are harmless.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    }

    /// Snapshot the live entry for `key`, if any.
    ///
    /// Expired entries read as absent even before they are swept.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .map(|entry| *entry)
            .filter(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
