//! Read API rate limiting.
//!
//! Token buckets keyed by (endpoint, observer). Buckets refill
//! continuously at the per-minute rate and cap at one minute's worth of
//! tokens.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Token bucket for rate limiting.
#[derive(Debug)]
struct TokenBucket {
    tokens: AtomicU64,
    capacity: u64,
    refill_per_sec: f64,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    fn new(per_minute: u64) -> Self {
        Self {
            tokens: AtomicU64::new(per_minute),
            capacity: per_minute,
            refill_per_sec: per_minute as f64 / 60.0,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn try_consume(&self) -> bool {
        self.refill();

        let mut current = self.tokens.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return false;
            }
            match self.tokens.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn refill(&self) {
        let mut last_refill = self.last_refill.lock().expect("bucket lock poisoned");
        let elapsed = last_refill.elapsed().as_secs_f64();

        let tokens_to_add = (elapsed * self.refill_per_sec) as u64;
        if tokens_to_add > 0 {
            let current = self.tokens.load(Ordering::SeqCst);
            let refilled = (current + tokens_to_add).min(self.capacity);
            self.tokens.store(refilled, Ordering::SeqCst);
            *last_refill = Instant::now();
        }
    }
}

/// Per-(endpoint, observer) rate limiter.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<(String, String), Arc<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token for this endpoint/observer pair. Returns false
    /// when the caller is over its per-minute budget.
    pub fn check(&self, endpoint: &str, observer: &str, per_minute: u64) -> bool {
        let key = (endpoint.to_string(), observer.to_string());
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Arc::new(TokenBucket::new(per_minute)))
            .clone();
        bucket.try_consume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausts_at_capacity() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("/ox/live", "alice", 5));
        }
        assert!(!limiter.check("/ox/live", "alice", 5));
    }

    #[test]
    fn test_buckets_are_per_observer() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("/ox/live", "alice", 3));
        }
        assert!(!limiter.check("/ox/live", "alice", 3));
        assert!(limiter.check("/ox/live", "bob", 3));
    }

    #[test]
    fn test_buckets_are_per_endpoint() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("/ox/live", "alice", 1));
        assert!(!limiter.check("/ox/live", "alice", 1));
        assert!(limiter.check("/ox/artifacts", "alice", 1));
    }
}
