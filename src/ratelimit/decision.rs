//! Admission decisions returned to the request pipeline.

use serde::{Deserialize, Serialize};

use super::entry::RateLimitEntry;
use super::policy::RateLimitConfig;

/// Outcome of a quota check.
///
/// Both admissions and rejections are ordinary results; the caller turns a
/// rejection into a throttling response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// The configured quota for the window
    pub limit: u64,
    /// Requests left in the window, floored at zero
    pub remaining: u64,
    /// Window close, in whole seconds since the epoch (rounded up)
    pub reset_at: u64,
    /// Seconds to wait before retrying; only set on rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// Exact window close in epoch milliseconds, identifying the window
    #[serde(skip)]
    pub window_reset_at_ms: u64,
}

impl Decision {
    /// Build a decision for a counter that now stands at `count`.
    pub fn evaluate(count: u64, window_reset_at_ms: u64, config: &RateLimitConfig, now_ms: u64) -> Self {
        let limit = config.max_requests;
        let admitted = count <= limit;
        let retry_after_seconds = if admitted {
            None
        } else {
            // Never zero: a rejected request always sits in a live window.
            Some(window_reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1))
        };

        Self {
            admitted,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: window_reset_at_ms.div_ceil(1000),
            retry_after_seconds,
            window_reset_at_ms,
        }
    }

    /// Build a decision from a store entry.
    pub fn from_entry(entry: &RateLimitEntry, config: &RateLimitConfig, now_ms: u64) -> Self {
        Self::evaluate(entry.count, entry.window_reset_at, config, now_ms)
    }

    /// Whether this decision throttled the request.
    pub fn is_rejected(&self) -> bool {
        !self.admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: u64) -> RateLimitConfig {
        RateLimitConfig::new(60_000, max_requests)
    }

    #[test]
    fn test_admitted_decision_has_no_retry_hint() {
        let decision = Decision::evaluate(3, 61_000, &config(5), 1_000);
        assert!(decision.admitted);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_at, 61);
        assert_eq!(decision.retry_after_seconds, None);
    }

    #[test]
    fn test_rejected_decision_rounds_retry_up() {
        let decision = Decision::evaluate(6, 61_000, &config(5), 20_500);
        assert!(decision.is_rejected());
        assert_eq!(decision.remaining, 0);
        // 40.5 seconds left
        assert_eq!(decision.retry_after_seconds, Some(41));
    }

    #[test]
    fn test_reset_at_rounds_up_to_whole_seconds() {
        let decision = Decision::evaluate(1, 61_001, &config(5), 1_001);
        assert_eq!(decision.reset_at, 62);
        assert_eq!(decision.window_reset_at_ms, 61_001);
    }

    #[test]
    fn test_serialized_shape() {
        let decision = Decision::evaluate(6, 60_000, &config(5), 0);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["admitted"], false);
        assert_eq!(json["retry_after_seconds"], 60);
        assert!(json.get("window_reset_at_ms").is_none());

        let admitted = Decision::evaluate(1, 60_000, &config(5), 0);
        let json = serde_json::to_value(&admitted).unwrap();
        assert!(json.get("retry_after_seconds").is_none());
    }
}
