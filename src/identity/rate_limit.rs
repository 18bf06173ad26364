use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Instant;

use parking_lot::Mutex;

/// What a bucket is keyed on. Each variant gets its own key namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateScope {
    Ip(String),
    Subject(i64),
    Email(String),
}

impl Display for RateScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RateScope::Ip(ip) => write!(f, "ip:{}", ip),
            RateScope::Subject(id) => write!(f, "subject:{}", id),
            RateScope::Email(email) => write!(f, "email:{}", email.trim().to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self { Self { capacity: 10.0, refill_per_sec: 0.2 } }
}

/// Bucket count above which idle buckets are swept on the next call.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refilled(&self, now: Instant, cfg: &RateLimitConfig) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * cfg.refill_per_sec).min(cfg.capacity)
    }
}

/// Token-bucket limiter; one bucket per distinct [`RateScope`].
///
/// Keys are caller-controlled, so once the map grows past the sweep threshold every bucket
/// that has refilled to capacity is dropped; a fresh bucket starts full, so eviction never
/// changes a decision.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimitConfig,
    sweep_threshold: usize,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self { Self::with_sweep_threshold(cfg, DEFAULT_SWEEP_THRESHOLD) }

    pub fn with_sweep_threshold(cfg: RateLimitConfig, sweep_threshold: usize) -> Self {
        Self { cfg, sweep_threshold, buckets: Mutex::new(HashMap::new()) }
    }

    pub fn allow(&self, scope: &RateScope) -> bool { self.allow_at(scope, Instant::now()) }

    pub fn allow_at(&self, scope: &RateScope, now: Instant) -> bool {
        let cfg = self.cfg;
        let mut lock = self.buckets.lock();
        if lock.len() >= self.sweep_threshold {
            let before = lock.len();
            lock.retain(|_, b| b.refilled(now, &cfg) < cfg.capacity);
            tracing::debug!(target: "auth", evicted = before - lock.len(), "rate limit buckets swept");
        }
        let bucket = lock.entry(scope.to_string()).or_insert_with(|| Bucket { tokens: cfg.capacity, last_refill: now });
        bucket.tokens = bucket.refilled(now, &cfg);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
