use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Token bucket shared by every worker, so the configured rate is the
/// aggregate offered load for the whole run. Integer micro-scale math keeps
/// sub-millisecond pacing exact.
pub struct RateLimiter {
    /// Target rate in tokens per second.
    rate: u64,
    /// Maximum tokens that can accumulate while idle.
    capacity: u64,
    state: Mutex<Bucket>,
}

struct Bucket {
    /// Current token count, scaled by MICROS_PER_SECOND.
    tokens: u128,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rate: u64) -> Self {
        Self::with_capacity(rate, rate)
    }

    /// `capacity` bounds how many sends can burst after an idle stretch.
    pub fn with_capacity(rate: u64, capacity: u64) -> Self {
        assert!(rate > 0, "rate limiter needs a positive rate");
        Self {
            rate,
            capacity,
            state: Mutex::new(Bucket {
                tokens: capacity as u128 * MICROS_PER_SECOND,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block until the next send is permitted. Callers take a token before
    /// capturing the issue timestamp, so pacing delay never shows up as
    /// request latency.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= MICROS_PER_SECOND {
                    bucket.tokens -= MICROS_PER_SECOND;
                    return;
                }
                let deficit = MICROS_PER_SECOND - bucket.tokens;
                // deficit accrues at `rate` scaled units per microsecond
                Duration::from_micros((deficit / self.rate as u128).max(1) as u64)
            };
            sleep(wait).await;
        }
    }

    /// Take a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= MICROS_PER_SECOND {
            bucket.tokens -= MICROS_PER_SECOND;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_micros();
        if elapsed == 0 {
            return;
        }

        bucket.tokens = bucket.tokens.saturating_add(self.rate as u128 * elapsed);
        let max = self.capacity as u128 * MICROS_PER_SECOND;
        if bucket.tokens > max {
            bucket.tokens = max;
        }
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test]
    async fn acquires_immediately_from_a_full_bucket() {
        let limiter = RateLimiter::new(100);
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_at_the_configured_rate() {
        let limiter = RateLimiter::new(1_000);

        for _ in 0..1_000 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        advance(Duration::from_millis(100)).await;

        let mut acquired = 0;
        for _ in 0..150 {
            if limiter.try_acquire().await {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_a_stream_of_acquires() {
        let limiter = RateLimiter::with_capacity(1_000, 1);
        let start = Instant::now();

        for _ in 0..101 {
            limiter.acquire().await;
        }

        // one token up front, then 100 paced at 1ms apart
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(100) && elapsed <= Duration::from_millis(110),
            "elapsed: {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_bounded_by_capacity() {
        let limiter = RateLimiter::with_capacity(10, 2);
        advance(Duration::from_secs(60)).await;

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }
}
