use super::{
    cache_key, cache_name, elapsed_secs, positive_rate, unit_interval, whole_units, Decision,
    RateLimiter,
};
use crate::cache::{CacheOptions, TtlCache};
use crate::error::{ThrottlerError, ThrottlerResult};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Per-identity queue level of a leaky bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakyBucketState {
    pub requests: u64,
    pub last_leak: Instant,
}

impl LeakyBucketState {
    pub fn empty(now: Instant) -> Self {
        Self {
            requests: 0,
            last_leak: now,
        }
    }

    /// Drains whole requests leaked since the last probe, then queues one
    /// more if the level is below `capacity`.
    ///
    /// Unlike the token bucket, `last_leak` always advances.
    pub fn try_enqueue(&mut self, capacity: u64, leak_rate: f64, now: Instant) -> bool {
        let leaked = whole_units(elapsed_secs(now, self.last_leak), leak_rate);
        self.requests = self.requests.saturating_sub(leaked);
        // Probes racing for the lock may arrive slightly out of order
        self.last_leak = self.last_leak.max(now);

        if self.requests < capacity {
            self.requests += 1;
            true
        } else {
            false
        }
    }

    /// Time from `now` until the next whole request leaks out.
    pub fn next_leak_in(&self, leak_rate: f64, now: Instant) -> Duration {
        unit_interval(leak_rate).saturating_sub(now.saturating_duration_since(self.last_leak))
    }
}

/// Leaky bucket limiter: a queue of at most `capacity` requests draining at
/// `leak_rate` per second.
pub struct LeakyBucketLimiter {
    capacity: u64,
    leak_rate: f64,
    key_prefix: String,
    cache: TtlCache<LeakyBucketState>,
}

impl LeakyBucketLimiter {
    pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(15 * 60);

    pub fn new(capacity: u64, leak_rate: f64) -> ThrottlerResult<Self> {
        Self::with_prefix(capacity, leak_rate, "")
    }

    pub fn with_prefix(
        capacity: u64,
        leak_rate: f64,
        key_prefix: impl Into<String>,
    ) -> ThrottlerResult<Self> {
        let key_prefix = key_prefix.into();
        let options = CacheOptions::new(
            cache_name("leaky_bucket_rate_limiter", &key_prefix),
            Self::DEFAULT_MAX_IDLE,
        );
        Self::with_cache_options(capacity, leak_rate, key_prefix, options)
    }

    pub fn with_cache_options(
        capacity: u64,
        leak_rate: f64,
        key_prefix: impl Into<String>,
        options: CacheOptions,
    ) -> ThrottlerResult<Self> {
        if capacity == 0 {
            return Err(ThrottlerError::Configuration(
                "Leaky bucket capacity must be greater than 0".to_string(),
            ));
        }
        positive_rate("Leaky bucket leak rate", leak_rate)?;

        Ok(Self {
            capacity,
            leak_rate,
            key_prefix: key_prefix.into(),
            cache: TtlCache::new(options)?,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn leak_rate(&self) -> f64 {
        self.leak_rate
    }

    pub fn check_at(&self, identity: &str, now: Instant) -> Decision {
        let key = cache_key(&self.key_prefix, identity);
        let (capacity, leak_rate) = (self.capacity, self.leak_rate);

        let (allowed, level, retry_after) = self.cache.with_entry(
            &key,
            || LeakyBucketState::empty(now),
            |state| {
                let allowed = state.try_enqueue(capacity, leak_rate, now);
                let retry_after = if allowed {
                    Duration::ZERO
                } else {
                    state.next_leak_in(leak_rate, now)
                };
                (allowed, state.requests, retry_after)
            },
        );

        debug!(cache = %self.cache.name(), identity = %key, allowed, level, "Leaky bucket probe");
        Decision {
            allowed,
            limit: capacity,
            remaining: capacity.saturating_sub(level),
            retry_after,
        }
    }

    pub fn is_allowed_at(&self, identity: &str, now: Instant) -> bool {
        self.check_at(identity, now).allowed
    }
}

impl RateLimiter for LeakyBucketLimiter {
    fn check(&self, identity: &str) -> Decision {
        self.check_at(identity, Instant::now())
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
