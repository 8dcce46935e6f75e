//! Rate limiting algorithms module
//!
//! Each algorithm owns a [`TtlCache`](crate::cache::TtlCache) keyed by caller
//! identity and answers a single question per probe: admit or deny.

pub mod fixed_window;
pub mod leaky_bucket;
pub mod token_bucket;

use std::borrow::Cow;
use std::time::Duration;
use tokio::time::Instant;

pub use fixed_window::{FixedWindowLimiter, FixedWindowState};
pub use leaky_bucket::{LeakyBucketLimiter, LeakyBucketState};
pub use token_bucket::{TokenBucketLimiter, TokenBucketState};

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Capacity or per-window limit of the limiter
    pub limit: u64,
    /// Admissions left for this identity after the probe
    pub remaining: u64,
    /// Zero when admitted; otherwise how long until a retry can succeed
    pub retry_after: Duration,
}

/// Trait for rate limiting algorithms
pub trait RateLimiter: Send + Sync {
    /// Probe `identity`, recording the request if it is admitted
    fn check(&self, identity: &str) -> Decision;

    /// Check if a request for `identity` should be allowed, recording it if so
    fn is_allowed(&self, identity: &str) -> bool {
        self.check(identity).allowed
    }

    /// Name of the backing cache, used in logs
    fn name(&self) -> &str;

    /// Number of identities currently holding state
    fn tracked_identities(&self) -> usize;

    /// Stop the backing cache's background tasks
    fn shutdown(&self);
}

/// Namespaces `identity` under `prefix`, leaving it untouched when the prefix is empty.
pub(crate) fn cache_key<'a>(prefix: &str, identity: &'a str) -> Cow<'a, str> {
    if prefix.is_empty() {
        Cow::Borrowed(identity)
    } else {
        Cow::Owned(format!("{}:{}", prefix, identity))
    }
}

/// Backing cache name for a limiter kind, suffixed with `:prefix` when one is set.
pub(crate) fn cache_name(kind: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        kind.to_string()
    } else {
        format!("{}:{}", kind, prefix)
    }
}

/// Seconds between `earlier` and `now` at millisecond resolution, zero if
/// `now` is not after `earlier`.
pub(crate) fn elapsed_secs(now: Instant, earlier: Instant) -> f64 {
    now.saturating_duration_since(earlier).as_millis() as f64 / 1000.0
}

/// Whole units produced by `rate` per second over `elapsed` seconds.
pub(crate) fn whole_units(elapsed: f64, rate: f64) -> u64 {
    // `as` saturates for out of range floats
    (elapsed * rate).floor() as u64
}

/// Time needed to produce one unit at `rate` per second.
pub(crate) fn unit_interval(rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::MAX)
}

pub(crate) fn positive_rate(name: &str, rate: f64) -> crate::error::ThrottlerResult<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(crate::error::ThrottlerError::Configuration(format!(
            "{} must be a finite number greater than 0, got {}",
            name, rate
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cache_key_prefixing() {
        assert_eq!(cache_key("", "user1"), "user1");
        assert_eq!(cache_key("api", "user1"), "api:user1");
    }

    #[test]
    fn test_cache_name_omits_empty_prefix() {
        assert_eq!(cache_name("fixed_window_rate_limiter", ""), "fixed_window_rate_limiter");
        assert_eq!(
            cache_name("fixed_window_rate_limiter", "login"),
            "fixed_window_rate_limiter:login"
        );
    }

    #[test]
    fn test_elapsed_secs_truncates_to_millis() {
        let start = Instant::now();
        let later = start + Duration::from_micros(1_500_900);
        assert_eq!(elapsed_secs(later, start), 1.5);
        assert_eq!(elapsed_secs(start, later), 0.0);
    }

    #[test]
    fn test_whole_units_floors() {
        assert_eq!(whole_units(0.999, 1.0), 0);
        assert_eq!(whole_units(2.5, 2.0), 5);
        assert_eq!(whole_units(0.4, 2.0), 0);
    }

    #[test]
    fn test_unit_interval() {
        assert_eq!(unit_interval(1.0), Duration::from_secs(1));
        assert_eq!(unit_interval(4.0), Duration::from_millis(250));
        assert_eq!(unit_interval(f64::MIN_POSITIVE), Duration::MAX);
    }

    #[test]
    fn test_positive_rate() {
        assert!(positive_rate("rate", 0.5).is_ok());
        assert!(positive_rate("rate", 0.0).is_err());
        assert!(positive_rate("rate", -1.0).is_err());
        assert!(positive_rate("rate", f64::NAN).is_err());
        assert!(positive_rate("rate", f64::INFINITY).is_err());
    }
}
