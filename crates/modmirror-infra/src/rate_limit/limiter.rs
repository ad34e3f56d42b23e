use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use modmirror_core::models::JobKind;

/// Lowest accepted rate (jobs per second).
const MIN_RATE: f64 = 0.001;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let seconds = (1.0 - self.tokens) / self.refill_rate;
            Duration::from_secs_f64(seconds.max(0.0))
        }
    }
}

/// Token-bucket rate limiter keyed by job kind.
///
/// Each kind gets a bucket holding two seconds' worth of tokens, so short
/// bursts go through immediately.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<JobKind, TokenBucket>>>,
    rate: f64,
}

impl RateLimiter {
    /// Rate in jobs per second, applied to each kind separately.
    pub fn new(rate: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate: rate.max(MIN_RATE),
        }
    }

    fn initial_bucket(&self) -> TokenBucket {
        TokenBucket::new((self.rate * 2.0).max(1.0), self.rate)
    }

    /// Acquire a token for the given job kind, waiting until one is available
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, kind: JobKind) {
        loop {
            let wait_duration = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(kind)
                    .or_insert_with(|| self.initial_bucket());

                if bucket.try_acquire() {
                    tracing::trace!(
                        kind = %kind,
                        tokens_remaining = bucket.tokens,
                        "Rate limit token acquired"
                    );
                    return;
                }

                bucket.time_until_next_token()
            };

            tracing::debug!(
                kind = %kind,
                wait_ms = wait_duration.as_millis() as u64,
                "Rate limit reached, waiting for token"
            );
            tokio::time::sleep(wait_duration.max(Duration::from_millis(1))).await;
        }
    }

    #[cfg(test)]
    async fn available_tokens(&self, kind: JobKind) -> f64 {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(kind)
            .or_insert_with(|| self.initial_bucket());
        bucket.refill();
        bucket.tokens
    }
}
