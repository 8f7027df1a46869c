//! Global fetch token bucket.
//!
//! Every worker takes one permit per outbound GET. The bucket refills
//! continuously at the configured rate and holds at most `burst`
//! permits, so over any window the number of fetch initiations is
//! bounded by `rate * seconds + burst`.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit cancelled")]
    Cancelled,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by the whole worker pool.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u64, burst: u64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: burst.max(1) as f64,
                last_refill: Instant::now(),
            }),
            rate_per_sec: rate_per_sec.max(1) as f64,
            burst: burst.max(1) as f64,
        }
    }

    /// Take one permit without waiting. Returns the time until a permit
    /// would be available when the bucket is empty.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - state.tokens;
        let wait_secs = deficit / self.rate_per_sec;
        Err(Duration::from_secs_f64(wait_secs))
    }

    /// Block until a permit is available or the crawl is cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        loop {
            let wait_for = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(d) => d,
            };

            // Sleep at least one millisecond so a tiny deficit cannot
            // degenerate into a busy loop.
            let wait_for = wait_for.max(Duration::from_millis(1));

            tokio::select! {
                _ = tokio::time::sleep(wait_for) => {}
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
            }
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
            state.last_refill = now;
        }
    }
}
