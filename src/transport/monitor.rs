use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counts range requests for one session and flags scraping-like rates.
///
/// Advisory only. Enforcement lives in the proxy's rate limiter.
#[derive(Debug)]
pub struct RequestMonitor {
    started: Instant,
    count: AtomicU64,
    rate_threshold: f64,
    total_threshold: u64,
}

/// One observation taken when a request is recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestSample {
    pub count: u64,
    pub elapsed: Duration,
    pub rate_per_sec: f64,
    pub suspicious: bool,
}

impl RequestMonitor {
    pub fn new(rate_threshold: f64, total_threshold: u64) -> Self {
        Self {
            started: Instant::now(),
            count: AtomicU64::new(0),
            rate_threshold,
            total_threshold,
        }
    }

    pub fn record(&self) -> RequestSample {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = self.started.elapsed();
        // Sub-second bursts are measured against a full second.
        let rate_per_sec = count as f64 / elapsed.as_secs_f64().max(1.0);
        RequestSample {
            count,
            elapsed,
            rate_per_sec,
            suspicious: rate_per_sec > self.rate_threshold || count > self.total_threshold,
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
