//! Per-client token bucket rate limiting.
//!
//! Each client key gets its own bucket, created full on first sight. A
//! bucket refills continuously at `refill_per_second` up to `capacity` and
//! every admitted request consumes one token. Buckets live in a sharded
//! map, so two clients only contend when they hash to the same shard.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Refills, then takes one token or reports how long until one is available.
    fn try_acquire(&mut self, capacity: f64, rate: f64, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::try_from_secs_f64(deficit / rate).unwrap_or(Duration::MAX))
        }
    }
}

/// Token bucket limiter keyed by client identity.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_second: f64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(config.capacity),
            refill_per_second: config.refill_per_second,
        }
    }

    /// Admits or denies one request for `client_key`.
    ///
    /// # Errors
    /// Returns the time until the next token becomes available. A denied
    /// request consumes nothing.
    pub fn check(&self, client_key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        // Fast path avoids allocating the key for known clients.
        if let Some(mut bucket) = self.buckets.get_mut(client_key) {
            return bucket.try_acquire(self.capacity, self.refill_per_second, now);
        }
        self.buckets
            .entry(client_key.to_string())
            .or_insert_with(|| Bucket::full(self.capacity, now))
            .try_acquire(self.capacity, self.refill_per_second, now)
    }

    /// Returns whether a request from `client_key` is admitted.
    pub fn allow(&self, client_key: &str) -> bool {
        self.check(client_key).is_ok()
    }

    /// Drops buckets idle for at least `idle`. A dropped bucket would have
    /// refilled anyway once `idle >= capacity / refill`.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.buckets.len(), "Evicted idle rate-limit buckets");
        }
        evicted
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
