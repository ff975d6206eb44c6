//! Per-service token-bucket admission control.
//!
//! One independent bucket per named service; buckets never block each other.
//! All concurrent row workers share one registry, so the observed call rate
//! for a service can never exceed its refill rate plus the bucket capacity.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::trace;

/// One service's bucket. Counters are only touched under the registry lock.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Credit tokens for the time elapsed since the last refill.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_acquire(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Registry of named token buckets, constructed once per run and shared by
/// reference into every component that makes external calls.
pub struct RateLimiterRegistry {
    buckets: HashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Register a bucket for `service`. Capacity is the burst allowance;
    /// `refill_per_sec` must be positive for waiters to make progress.
    pub fn register(&mut self, service: &str, capacity: u32, refill_per_sec: f64) {
        self.buckets.insert(
            service.to_string(),
            Mutex::new(TokenBucket::new(capacity.max(1), refill_per_sec.max(0.001))),
        );
    }

    /// Consume one token for `service`, suspending until one is available.
    /// Unregistered services are admitted immediately.
    pub async fn acquire(&self, service: &str) {
        let Some(bucket) = self.buckets.get(service) else {
            return;
        };

        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                bucket.try_acquire(Instant::now())
            };
            match wait {
                None => return,
                Some(delay) => {
                    trace!(service, delay_ms = delay.as_millis() as u64, "rate limited");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_is_immediate() {
        let mut registry = RateLimiterRegistry::new();
        registry.register("search", 3, 1.0);

        let start = Instant::now();
        for _ in 0..3 {
            registry.acquire("search").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_rate_bounds_sustained_throughput() {
        let mut registry = RateLimiterRegistry::new();
        registry.register("search", 2, 10.0);

        // Drain the burst, then 10 more acquisitions at 10/sec must take
        // right around one second of virtual time.
        let start = Instant::now();
        for _ in 0..12 {
            registry.acquire("search").await;
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(950), "elapsed: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1100), "elapsed: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_all_eventually_acquire() {
        let registry = std::sync::Arc::new({
            let mut r = RateLimiterRegistry::new();
            r.register("model", 1, 5.0);
            r
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = std::sync::Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.acquire("model").await;
            }));
        }
        for handle in handles {
            handle.await.expect("waiter finished");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_independent() {
        let mut registry = RateLimiterRegistry::new();
        registry.register("search", 1, 0.001);
        registry.register("model", 5, 1.0);

        // Exhaust "search"
        registry.acquire("search").await;

        // "model" must not be affected
        let start = Instant::now();
        for _ in 0..5 {
            registry.acquire("model").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_service_admits_immediately() {
        let registry = RateLimiterRegistry::new();
        let start = Instant::now();
        registry.acquire("not-registered").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_cap_at_capacity() {
        let mut registry = RateLimiterRegistry::new();
        registry.register("search", 2, 100.0);

        // Long idle must not accumulate more than `capacity` tokens
        tokio::time::sleep(Duration::from_secs(60)).await;
        let start = Instant::now();
        for _ in 0..3 {
            registry.acquire("search").await;
        }
        // Third acquisition had to wait for a refill
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
