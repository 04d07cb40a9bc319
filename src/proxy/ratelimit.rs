//! Per-caller range rate limiting using a keyed token bucket.
//!
//! The client-side request monitor only warns; this limiter is the enforcement point.
//! Keys are auth tokens, so one reader cannot starve another and rotating the
//! session token does not open a fresh bucket.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;

/// Keyed limiter shared by all stream requests. Disabled when the rate is zero.
#[derive(Clone)]
pub struct RangeRateLimiter {
    inner: Option<Arc<DefaultKeyedRateLimiter<String>>>,
}

impl RangeRateLimiter {
    pub fn new(per_second: u32, burst: u32) -> Self {
        let Some(rate) = NonZeroU32::new(per_second) else {
            return Self::disabled();
        };
        let burst = NonZeroU32::new(burst.max(per_second)).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            inner: Some(Arc::new(RateLimiter::keyed(quota))),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Returns `true` when the request may proceed.
    pub fn check(&self, key: &str) -> bool {
        match &self.inner {
            Some(limiter) => limiter.check_key(&key.to_string()).is_ok(),
            None => true,
        }
    }

    /// Spawn a task that periodically drops idle keys.
    pub fn spawn_cleanup(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let limiter = self.inner.clone()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                limiter.retain_recent();
                limiter.shrink_to_fit();
                tracing::trace!(keys = limiter.len(), "range rate limiter cleaned up");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject() {
        let limiter = RangeRateLimiter::new(1, 3);
        assert!(limiter.check("session-a"));
        assert!(limiter.check("session-a"));
        assert!(limiter.check("session-a"));
        assert!(!limiter.check("session-a"));
        // Other sessions have their own bucket.
        assert!(limiter.check("session-b"));
    }

    #[test]
    fn zero_rate_disables() {
        let limiter = RangeRateLimiter::new(0, 0);
        assert!((0..1000).all(|_| limiter.check("s")));
    }
}
