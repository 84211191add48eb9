//! Request pacing for upstream lookups.
//!
//! Workers call `acquire()` before every request. [`Unlimited`] is the default
//! and leaves pacing to the fixed inter-chunk delay; [`TokenBucket`] adds a
//! steady requests-per-second ceiling on top of it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Suspends until one request is permitted.
    async fn acquire(&self);
}

/// Permits every request immediately.
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Classic token bucket. Callers that find the bucket empty reserve a token
/// (driving the balance negative) and sleep until it would have refilled, so
/// waiters are served in arrival order without holding the lock while asleep.
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `rate_per_sec` must be positive; `burst` is clamped to at least 1.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate_per_sec: rate_per_sec.max(f64::MIN_POSITIVE),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// How long the caller must wait after reserving one token.
    async fn reserve(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;

        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate_per_sec)
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self) {
        let wait = self.reserve().await;
        if !wait.is_zero() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limiter: waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Limiter for a configured requests-per-second rate; 0 or less disables it.
/// Burst is one second's worth of requests.
pub fn from_rps(rps: f64) -> Arc<dyn RateLimiter> {
    if rps > 0.0 {
        Arc::new(TokenBucket::new(rps, rps.ceil() as u32))
    } else {
        Arc::new(Unlimited)
    }
}
