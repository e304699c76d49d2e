//! Per-key window counter.

/// Counter state for a single key within one fixed window.
///
/// The key itself is the map key in the owning store; only the counter and
/// the window boundary are kept here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests counted in the current window
    pub count: u64,
    /// Epoch milliseconds at which the window closes
    pub window_reset_at: u64,
}

impl RateLimitEntry {
    /// Open a new window at `now_ms` holding the triggering request.
    pub fn open(now_ms: u64, window_duration_ms: u64) -> Self {
        Self {
            count: 1,
            window_reset_at: now_ms.saturating_add(window_duration_ms),
        }
    }

    /// An expired entry is equivalent to an absent one.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.window_reset_at <= now_ms
    }

    /// Milliseconds left before the window closes.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.window_reset_at.saturating_sub(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_starts_at_one() {
        let entry = RateLimitEntry::open(10_000, 60_000);
        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_reset_at, 70_000);
    }

    #[test]
    fn test_expiry_is_inclusive_of_reset_instant() {
        let entry = RateLimitEntry::open(0, 1_000);
        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));
        assert!(entry.is_expired(5_000));
    }

    #[test]
    fn test_remaining_ms_floors_at_zero() {
        let entry = RateLimitEntry::open(0, 1_000);
        assert_eq!(entry.remaining_ms(250), 750);
        assert_eq!(entry.remaining_ms(2_000), 0);
    }
}
