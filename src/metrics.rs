use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time copy of the admission counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub throttled_requests: u64,
    pub rejected_requests: u64,
    pub last_reset: u64,
}

/// Admission decisions counted by the middleware.
///
/// `rejected` counts requests refused before reaching the limiter because
/// no identity could be derived.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    allowed: AtomicU64,
    throttled: AtomicU64,
    rejected: AtomicU64,
    last_reset: AtomicU64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl MetricsCollector {
    pub fn new() -> Self {
        let collector = Self::default();
        collector.inner.last_reset.store(unix_now(), Ordering::Relaxed);
        collector
    }

    pub fn record_decision(&self, allowed: bool) {
        let counter = if allowed {
            &self.inner.allowed
        } else {
            &self.inner.throttled
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ThrottleMetrics {
        let allowed = self.inner.allowed.load(Ordering::Relaxed);
        let throttled = self.inner.throttled.load(Ordering::Relaxed);
        let rejected = self.inner.rejected.load(Ordering::Relaxed);
        ThrottleMetrics {
            total_requests: allowed + throttled + rejected,
            allowed_requests: allowed,
            throttled_requests: throttled,
            rejected_requests: rejected,
            last_reset: self.inner.last_reset.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.inner.allowed.store(0, Ordering::Relaxed);
        self.inner.throttled.store(0, Ordering::Relaxed);
        self.inner.rejected.store(0, Ordering::Relaxed);
        self.inner.last_reset.store(unix_now(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_each_outcome() {
        let metrics = MetricsCollector::new();
        metrics.record_decision(true);
        metrics.record_decision(true);
        metrics.record_decision(false);
        metrics.record_rejection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.allowed_requests, 2);
        assert_eq!(snapshot.throttled_requests, 1);
        assert_eq!(snapshot.rejected_requests, 1);
        assert!(snapshot.last_reset > 0);
    }

    #[test]
    fn test_clones_share_counters_and_reset() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();
        clone.record_decision(false);
        assert_eq!(metrics.snapshot().throttled_requests, 1);

        metrics.reset();
        assert_eq!(clone.snapshot().total_requests, 0);
    }
}
