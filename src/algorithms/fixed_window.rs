use super::{cache_key, cache_name, Decision, RateLimiter};
use crate::cache::{CacheOptions, TtlCache};
use crate::error::{ThrottlerError, ThrottlerResult};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedWindowState {
    pub count: u64,
}

/// Counts admissions per identity and relies on the cache's idle expiry to
/// reset the count.
///
/// The window is an idle timeout, not a wall-clock window: every probe,
/// admitted or not, refreshes the entry, so an identity that keeps probing
/// more often than `window` never has its count reset.
pub struct FixedWindowLimiter {
    limit: u64,
    window: Duration,
    key_prefix: String,
    cache: TtlCache<FixedWindowState>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u64, window: Duration) -> ThrottlerResult<Self> {
        Self::with_prefix(limit, window, "")
    }

    pub fn with_prefix(
        limit: u64,
        window: Duration,
        key_prefix: impl Into<String>,
    ) -> ThrottlerResult<Self> {
        let key_prefix = key_prefix.into();
        let options = CacheOptions::new(cache_name("fixed_window_rate_limiter", &key_prefix), window);
        Self::with_cache_options(limit, key_prefix, options)
    }

    /// The window is the cache's `max_idle`.
    pub fn with_cache_options(
        limit: u64,
        key_prefix: impl Into<String>,
        options: CacheOptions,
    ) -> ThrottlerResult<Self> {
        if limit == 0 {
            return Err(ThrottlerError::Configuration(
                "Fixed window limit must be greater than 0".to_string(),
            ));
        }
        if options.max_idle.is_zero() {
            return Err(ThrottlerError::Configuration(
                "Fixed window duration must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            limit,
            window: options.max_idle,
            key_prefix: key_prefix.into(),
            cache: TtlCache::new(options)?,
        })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl RateLimiter for FixedWindowLimiter {
    /// A denied identity is told to wait one full window, which is how long
    /// it must stay idle for its count to be dropped.
    fn check(&self, identity: &str) -> Decision {
        let key = cache_key(&self.key_prefix, identity);
        let limit = self.limit;

        let (allowed, count) = self.cache.with_entry(&key, FixedWindowState::default, |state| {
            if state.count < limit {
                state.count += 1;
                (true, state.count)
            } else {
                (false, state.count)
            }
        });

        debug!(cache = %self.cache.name(), identity = %key, allowed, count, "Fixed window probe");
        Decision {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            retry_after: if allowed { Duration::ZERO } else { self.window },
        }
    }

    fn name(&self) -> &str {
        self.cache.name()
    }

    fn tracked_identities(&self) -> usize {
        self.cache.len()
    }

    fn shutdown(&self) {
        self.cache.shutdown();
    }
}
