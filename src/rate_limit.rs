use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;

// Token bucket for one service - refilled lazily on every admission check
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_rate: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: u32, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    /// Add `refill_rate` tokens per whole window elapsed, capped at capacity.
    fn refill(&mut self, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let windows = elapsed.as_nanos() / window.as_nanos().max(1);
        if windows == 0 {
            return;
        }
        let to_add = windows.saturating_mul(self.refill_rate as u128);
        let headroom = (self.capacity - self.tokens) as u128;
        self.tokens += to_add.min(headroom) as u32;
        // keep the partial window so refills don't drift
        self.last_refill += window * windows.min(u32::MAX as u128) as u32;
    }

    pub fn try_consume(&mut self, now: Instant, window: Duration) -> bool {
        self.refill(now, window);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }
}

/// Per-service token-bucket admission gate. Denial is a normal outcome.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn allow(&self, service: &str) -> bool {
        self.allow_at(service, Instant::now())
    }

    pub(crate) fn allow_at(&self, service: &str, now: Instant) -> bool {
        let bucket = self.bucket(service, now);
        let allowed = bucket.lock().try_consume(now, self.config.window);
        if !allowed {
            debug!(service = %service, "rate limit bucket empty");
        }
        allowed
    }

    /// Refill a bucket to capacity immediately.
    pub fn reset(&self, service: &str) {
        if let Some(bucket) = self.buckets.get(service) {
            bucket.lock().reset(Instant::now());
            debug!(service = %service, "rate limit bucket reset");
        }
    }

    pub fn remaining(&self, service: &str) -> Option<u32> {
        self.buckets.get(service).map(|b| b.lock().tokens())
    }

    // entry() holds the shard lock, so concurrent first use builds one bucket
    fn bucket(&self, service: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(service) {
            return Arc::clone(bucket.value());
        }
        self.buckets
            .entry(service.to_string())
            .or_insert_with(|| {
                let limit = self.config.limit_for(service);
                Arc::new(Mutex::new(TokenBucket::new(limit, limit, now)))
            })
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn limiter(default_limit: u32, services: &[(&str, u32)]) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            default_limit,
            window: Duration::from_secs(60),
            services: services
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
        })
    }

    #[test]
    fn test_exactly_capacity_calls_admitted() {
        let limiter = limiter(5, &[]);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at("weibo", now));
        }
        assert!(!limiter.allow_at("weibo", now));
    }

    #[test]
    fn test_per_service_limit_overrides_default() {
        let limiter = limiter(100, &[("douyu", 2)]);
        let now = Instant::now();
        assert!(limiter.allow_at("douyu", now));
        assert!(limiter.allow_at("douyu", now));
        assert!(!limiter.allow_at("douyu", now));
        assert!(limiter.allow_at("zhihu", now));
        assert_eq!(limiter.remaining("zhihu"), Some(99));
    }

    #[test]
    fn test_refill_after_whole_window() {
        let limiter = limiter(3, &[]);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at("gitee", start));
        }
        assert!(!limiter.allow_at("gitee", start + Duration::from_secs(59)));
        assert!(limiter.allow_at("gitee", start + Duration::from_secs(61)));
        assert_eq!(limiter.remaining("gitee"), Some(2));
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let mut bucket = TokenBucket::new(4, 4, Instant::now());
        let window = Duration::from_secs(60);
        let mut now = Instant::now();
        for step in 0..50u64 {
            now += Duration::from_secs(17 * (step % 7));
            bucket.try_consume(now, window);
            assert!(bucket.tokens() <= bucket.capacity());
        }
        now += Duration::from_secs(3600 * 24);
        bucket.try_consume(now, window);
        assert_eq!(bucket.tokens(), bucket.capacity() - 1);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let limiter = limiter(2, &[]);
        assert!(limiter.allow("bilibili"));
        assert!(limiter.allow("bilibili"));
        assert!(!limiter.allow("bilibili"));
        limiter.reset("bilibili");
        assert_eq!(limiter.remaining("bilibili"), Some(2));
        assert!(limiter.allow("bilibili"));
    }

    #[test]
    fn test_concurrent_first_use_creates_one_bucket() {
        let limiter = Arc::new(limiter(1000, &[]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..100).filter(|_| limiter.allow("shared")).count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 800);
        assert_eq!(limiter.remaining("shared"), Some(200));
    }
}
