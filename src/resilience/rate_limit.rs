//! Rate limiting.
//!
//! Fixed-window limiter keyed by provider id. Every harness that talks to the
//! same provider shares one limiter entry, so concurrent reviewers cannot
//! exceed the provider's configured quota between them. A provider's
//! reset hint (`Retry-After`) pauses the whole key until it passes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use editorial_orchestrator::resilience::RateLimiter;
//!
//! let limiter = RateLimiter::new(Duration::from_secs(60));
//! limiter.set_limit("claude", 50);
//! limiter.acquire("claude").await; // waits for a free slot
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest pause a single reset hint can impose on a key.
pub const MAX_DEFER: Duration = Duration::from_secs(24 * 60 * 60);

/// Shared, per-key request limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    limits: DashMap<String, KeyLimit>,
    window: Duration,
    default_max: usize,
}

struct KeyLimit {
    max_requests: usize,
    count: usize,
    reset_at: Instant,
    blocked_until: Option<Instant>,
}

/// Usage snapshot for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests consumed in the current window.
    pub used: usize,
    /// Requests still available in the current window.
    pub remaining: usize,
    /// Time until the current window resets.
    pub reset_in: Duration,
}

impl RateLimiter {
    /// Limiter with `window` per quota and no cap for unregistered keys.
    pub fn new(window: Duration) -> Self {
        Self::with_default(window, usize::MAX)
    }

    /// Limiter that applies `default_max` to keys without an explicit limit.
    pub fn with_default(window: Duration, default_max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                limits: DashMap::new(),
                window,
                default_max,
            }),
        }
    }

    /// Set the quota for `key`, keeping its current usage.
    pub fn set_limit(&self, key: &str, max_requests: usize) {
        let now = Instant::now();
        let window = self.inner.window;
        self.inner
            .limits
            .entry(key.to_string())
            .and_modify(|l| l.max_requests = max_requests)
            .or_insert(KeyLimit {
                max_requests,
                count: 0,
                reset_at: now + window,
                blocked_until: None,
            });
    }

    /// Take a slot for `key` if one is free.
    ///
    /// Returns `Ok(())` when allowed, or `Err(wait)` with the time until a
    /// slot could be free.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let window = self.inner.window;
        let mut entry = self
            .inner
            .limits
            .entry(key.to_string())
            .or_insert(KeyLimit {
                max_requests: self.inner.default_max,
                count: 0,
                reset_at: now + window,
                blocked_until: None,
            });

        if let Some(until) = entry.blocked_until {
            if until > now {
                return Err(until - now);
            }
            entry.blocked_until = None;
        }

        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        if entry.count >= entry.max_requests {
            warn!(
                key,
                count = entry.count,
                limit = entry.max_requests,
                "rate limit exceeded"
            );
            return Err(entry.reset_at.saturating_duration_since(now));
        }

        entry.count += 1;
        debug!(key, count = entry.count, limit = entry.max_requests, "rate limit check passed");
        Ok(())
    }

    /// Returns `true` if a slot was taken for `key`.
    pub fn check(&self, key: &str) -> bool {
        self.try_acquire(key).is_ok()
    }

    /// Wait until a slot for `key` is free, then take it.
    ///
    /// A zero quota never frees up; such keys are rejected by config
    /// validation before a limiter is built.
    pub async fn acquire(&self, key: &str) {
        loop {
            match self.try_acquire(key) {
                Ok(()) => return,
                Err(wait) => {
                    let wait = wait.max(Duration::from_millis(1));
                    debug!(key, wait_ms = wait.as_millis() as u64, "waiting for rate limit slot");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Block `key` for `delay`, honouring a provider reset hint.
    ///
    /// `delay` is capped at [`MAX_DEFER`].
    pub fn defer(&self, key: &str, delay: Duration) {
        let delay = delay.min(MAX_DEFER);
        let now = Instant::now();
        let until = now.checked_add(delay).unwrap_or(now);
        let window = self.inner.window;
        let default_max = self.inner.default_max;
        let mut entry = self
            .inner
            .limits
            .entry(key.to_string())
            .or_insert_with(|| KeyLimit {
                max_requests: default_max,
                count: 0,
                reset_at: Instant::now() + window,
                blocked_until: None,
            });
        if entry.blocked_until.map_or(true, |b| b < until) {
            entry.blocked_until = Some(until);
        }
        warn!(key, delay_ms = delay.as_millis() as u64, "provider asked to back off");
    }

    /// Forget usage for `key` (quota is kept).
    pub fn reset(&self, key: &str) {
        if let Some(mut entry) = self.inner.limits.get_mut(key) {
            entry.count = 0;
            entry.blocked_until = None;
            entry.reset_at = Instant::now() + self.inner.window;
        }
        debug!(key, "rate limit reset");
    }

    /// Current usage for `key`, if it has been seen.
    pub fn get_usage(&self, key: &str) -> Option<RateLimitInfo> {
        let now = Instant::now();
        self.inner.limits.get(key).map(|limit| RateLimitInfo {
            used: limit.count,
            remaining: limit.max_requests.saturating_sub(limit.count),
            reset_in: limit.reset_at.saturating_duration_since(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_per_key() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.set_limit("a", 2);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"), "third request must be rejected");

        limiter.set_limit("b", 1);
        assert!(limiter.check("b"), "keys are independent");
    }

    #[test]
    fn test_unregistered_key_uses_default() {
        let limiter = RateLimiter::with_default(Duration::from_secs(60), 1);
        assert!(limiter.check("x"));
        assert!(!limiter.check("x"));
    }

    #[test]
    fn test_zero_limit_blocks_all() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.set_limit("z", 0);
        assert!(!limiter.check("z"));
    }

    #[test]
    fn test_get_usage() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.set_limit("p", 10);
        limiter.check("p");
        limiter.check("p");
        let info = limiter.get_usage("p").expect("test: usage present");
        assert_eq!(info.used, 2);
        assert_eq!(info.remaining, 8);
        assert!(limiter.get_usage("unknown").is_none());
    }

    #[test]
    fn test_reset_restores_quota() {
        let limiter = RateLimiter::new(Duration::from_secs(600));
        limiter.set_limit("s", 1);
        assert!(limiter.check("s"));
        assert!(!limiter.check("s"));
        limiter.reset("s");
        assert!(limiter.check("s"), "quota must be restored");
    }

    #[test]
    fn test_defer_blocks_key_until_hint_passes() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.defer("p", Duration::from_secs(30));
        let wait = limiter.try_acquire("p").expect_err("test: blocked");
        assert!(wait > Duration::from_secs(25));
        assert!(limiter.check("other"));
    }

    #[test]
    fn test_oversized_defer_is_capped() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.defer("p", Duration::from_secs(u64::MAX / 2));
        limiter.defer("q", Duration::MAX);
        let wait = limiter.try_acquire("p").expect_err("test: blocked");
        assert!(wait <= MAX_DEFER);
        assert!(wait > MAX_DEFER - Duration::from_secs(5));
        assert!(limiter.try_acquire("q").is_err());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_window() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        limiter.set_limit("w", 1);
        limiter.acquire("w").await;
        let start = std::time::Instant::now();
        limiter.acquire("w").await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_quota() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.set_limit("shared", 5);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.check("shared") }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap_or(false) {
                ok += 1;
            }
        }
        assert_eq!(ok, 5);
    }
}
