//! Background removal of closed windows.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::backend::RateLimitBackend;

/// Default sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweep task.
///
/// The task runs until [`Sweeper::stop`] is called or the handle is dropped.
pub struct Sweeper {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `backend` every `interval`.
    ///
    /// The first sweep happens one full interval after start.
    pub fn spawn(backend: Arc<dyn RateLimitBackend>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(ticker);

        info!(
            backend = backend.name(),
            interval_ms = interval.as_millis() as u64,
            "Starting rate limit sweeper"
        );

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    tick = ticks.next() => {
                        if tick.is_none() {
                            break;
                        }
                        let removed = backend.purge_expired().await;
                        if removed > 0 {
                            debug!(removed = removed, "Purged expired rate limit entries");
                        }
                    }
                }
            }
            debug!("Rate limit sweeper stopped");
        });

        Self { shutdown, task }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(self) {
        // The receiver is gone only if the task already exited.
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Rate limit sweeper terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::{RateLimitConfig, RateLimiter};

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        limiter.check("key", &RateLimitConfig::new(1_000, 5));

        let sweeper = Sweeper::spawn(limiter.clone(), Duration::from_millis(10));

        clock.advance(1_000);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.is_empty());

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_sweeper_leaves_live_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        limiter.check("key", &RateLimitConfig::new(60_000, 5));

        let sweeper = Sweeper::spawn(limiter.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.stop().await;

        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_stop_returns_promptly() {
        tokio_test::block_on(async {
            let sweeper = Sweeper::spawn(Arc::new(RateLimiter::new()), DEFAULT_SWEEP_INTERVAL);
            tokio::time::timeout(Duration::from_secs(1), sweeper.stop())
                .await
                .expect("sweeper should stop without waiting for a tick");
        });
    }
}
