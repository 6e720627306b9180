//! Leaky-bucket request limiting, keyed by client IP.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

/// Default request budget: 100 requests per minute per client.
pub const DEFAULT_BUDGET_PER_MINUTE: f64 = 100.0;

struct Bucket {
    level: f64,
    last: Instant,
}

/// Leaky bucket per client. Each request adds one unit; the bucket drains
/// at the configured rate and requests are rejected while it is full.
pub struct RateLimiter {
    capacity: f64,
    drain_per_sec: f64,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter with the given per-minute budget.
    #[must_use]
    pub fn new(budget_per_minute: f64) -> Self {
        Self {
            capacity: budget_per_minute,
            drain_per_sec: budget_per_minute / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request for `client`, returning `false` when the client
    /// is over budget.
    pub fn check(&self, client: IpAddr) -> bool {
        let now = Instant::now();
        let mut guard = self.buckets.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = guard.entry(client).or_insert(Bucket {
            level: 0.0,
            last: now,
        });
        let drained = now.duration_since(bucket.last).as_secs_f64() * self.drain_per_sec;
        bucket.level = (bucket.level - drained).max(0.0);
        bucket.last = now;
        if bucket.level + 1.0 > self.capacity {
            return false;
        }
        bucket.level += 1.0;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_PER_MINUTE)
    }
}
