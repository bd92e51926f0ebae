//! Per-venue token buckets: 10 tokens/s refill, burst cap 10.
//!
//! Buckets live in a `DashMap` keyed by venue; each update is a short
//! critical section on that venue's entry only. An empty bucket answers
//! `false` and the caller returns 429 — nothing queues here.

use std::time::Instant;

use dashmap::DashMap;

use vigil_core::config::{RATE_LIMIT_BURST, RATE_LIMIT_PER_SEC};
use vigil_core::VenueId;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<VenueId, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token for `venue_id`. `false` means rate-limited.
    pub fn try_consume(&self, venue_id: &VenueId) -> bool {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(venue_id.clone())
            .or_insert_with(|| Bucket {
                tokens: RATE_LIMIT_BURST,
                last_refill: now,
            });

        let elapsed = now.duration_since(entry.last_refill).as_secs_f64();
        entry.tokens = (entry.tokens + elapsed * RATE_LIMIT_PER_SEC).min(RATE_LIMIT_BURST);
        entry.last_refill = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop a venue's bucket (venue deleted).
    pub fn forget(&self, venue_id: &VenueId) {
        self.buckets.remove(venue_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_ten_then_limited() {
        let limiter = RateLimiter::new();
        let venue = VenueId::from("v-1");
        for i in 0..10 {
            assert!(limiter.try_consume(&venue), "token {i} should pass");
        }
        assert!(!limiter.try_consume(&venue));
        assert!(!limiter.try_consume(&venue));
    }

    #[test]
    fn venues_have_independent_buckets() {
        let limiter = RateLimiter::new();
        let a = VenueId::from("v-a");
        let b = VenueId::from("v-b");
        for _ in 0..10 {
            assert!(limiter.try_consume(&a));
        }
        assert!(!limiter.try_consume(&a));
        assert!(limiter.try_consume(&b));
    }

    #[tokio::test]
    async fn refill_restores_roughly_ten_per_second() {
        let limiter = RateLimiter::new();
        let venue = VenueId::from("v-1");
        for _ in 0..10 {
            limiter.try_consume(&venue);
        }
        assert!(!limiter.try_consume(&venue));
        // ~200 ms buys about two tokens.
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        assert!(limiter.try_consume(&venue));
        assert!(limiter.try_consume(&venue));
        assert!(!limiter.try_consume(&venue));
    }
}
