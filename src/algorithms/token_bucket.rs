use super::{
    cache_key, cache_name, elapsed_secs, positive_rate, unit_interval, whole_units, Decision,
    RateLimiter,
};
use crate::cache::{CacheOptions, TtlCache};
use crate::error::{ThrottlerError, ThrottlerResult};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Per-identity token bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketState {
    pub tokens: u64,
    pub last_refill: Instant,
}

impl TokenBucketState {
    /// A full bucket, which is what a new identity starts with.
    pub fn full(capacity: u64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Credits whole tokens earned since the last refill, then takes one if
    /// any is available.
    ///
    /// `last_refill` only moves when at least one token was credited, so
    /// fractional progress towards the next token is kept across fast probes.
    pub fn try_consume(&mut self, capacity: u64, refill_rate: f64, now: Instant) -> bool {
        let tokens_to_add = whole_units(elapsed_secs(now, self.last_refill), refill_rate);
        if tokens_to_add > 0 {
            self.tokens = self.tokens.saturating_add(tokens_to_add).min(capacity);
            self.last_refill = now;
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Time from `now` until the next whole token is credited.
    pub fn next_token_in(&self, refill_rate: f64, now: Instant) -> Duration {
        unit_interval(refill_rate).saturating_sub(now.saturating_duration_since(self.last_refill))
    }
}

/// Token bucket limiter: bursts up to `capacity`, sustained `refill_rate` per second.
pub struct TokenBucketLimiter {
    capacity: u64,
    refill_rate: f64, // tokens per second
    key_prefix: String,
    cache: TtlCache<TokenBucketState>,
}

impl TokenBucketLimiter {
    pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(15 * 60);

    pub fn new(capacity: u64, refill_rate: f64) -> ThrottlerResult<Self> {
        Self::with_prefix(capacity, refill_rate, "")
    }

    pub fn with_prefix(
        capacity: u64,
        refill_rate: f64,
        key_prefix: impl Into<String>,
    ) -> ThrottlerResult<Self> {
        let key_prefix = key_prefix.into();
        let options = CacheOptions::new(
            cache_name("token_bucket_rate_limiter", &key_prefix),
            Self::DEFAULT_MAX_IDLE,
        );
        Self::with_cache_options(capacity, refill_rate, key_prefix, options)
    }

    pub fn with_cache_options(
        capacity: u64,
        refill_rate: f64,
        key_prefix: impl Into<String>,
        options: CacheOptions,
    ) -> ThrottlerResult<Self> {
        if capacity == 0 {
            return Err(ThrottlerError::Configuration(
                "Token bucket capacity must be greater than 0".to_string(),
            ));
        }
        positive_rate("Token bucket refill rate", refill_rate)?;

        Ok(Self {
            capacity,
            refill_rate,
            key_prefix: key_prefix.into(),
            cache: TtlCache::new(options)?,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Probe at an explicit instant.
    pub fn check_at(&self, identity: &str, now: Instant) -> Decision {
        let key = cache_key(&self.key_prefix, identity);
        let (capacity, refill_rate) = (self.capacity, self.refill_rate);

        let (allowed, remaining, retry_after) = self.cache.with_entry(
            &key,
            || TokenBucketState::full(capacity, now),
            |state| {
                let allowed = state.try_consume(capacity, refill_rate, now);
                let retry_after = if allowed {
                    Duration::ZERO
                } else {
                    state.next_token_in(refill_rate, now)
                };
                (allowed, state.tokens, retry_after)
            },
        );

        debug!(cache = %self.cache.name(), identity = %key, allowed, remaining, "Token bucket probe");
        Decision {
            allowed,
            limit: capacity,
            remaining,
            retry_after,
        }
    }

    pub fn is_allowed_at(&self, identity: &str, now: Instant) -> bool {
        self.check_at(identity, now).allowed
    }
}

impl RateLimiter for TokenBucketLimiter {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bucket_drains_then_denies() {
        let now = Instant::now();
        let mut bucket = TokenBucketState::full(3, now);
        assert!(bucket.try_consume(3, 1.0, now));
        assert!(bucket.try_consume(3, 1.0, now));
        assert!(bucket.try_consume(3, 1.0, now));
        assert_eq!(bucket.tokens, 0);
        assert!(!bucket.try_consume(3, 1.0, now));
        assert_eq!(bucket.tokens, 0);
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucketState::full(5, now);
        bucket.try_consume(5, 1000.0, now);

        let later = now + Duration::from_secs(60);
        assert!(bucket.try_consume(5, 1000.0, later));
        assert_eq!(bucket.tokens, 4);
        assert_eq!(bucket.last_refill, later);
    }

    #[test]
    fn test_partial_interval_is_not_discarded() {
        let now = Instant::now();
        let mut bucket = TokenBucketState {
            tokens: 0,
            last_refill: now,
        };

        // 0.5 tokens/s: two probes 1.2s apart each see less than a whole token
        // on their own, but the elapsed time keeps accumulating.
        assert!(!bucket.try_consume(10, 0.5, now + Duration::from_millis(1200)));
        assert_eq!(bucket.last_refill, now);
        assert!(bucket.try_consume(10, 0.5, now + Duration::from_millis(2400)));
        assert_eq!(bucket.last_refill, now + Duration::from_millis(2400));
    }

    #[test]
    fn test_denied_probe_does_not_overdraw() {
        let now = Instant::now();
        let mut bucket = TokenBucketState::full(1, now);
        assert!(bucket.try_consume(1, 1.0, now));
        for _ in 0..3 {
            assert!(!bucket.try_consume(1, 1.0, now));
        }
        assert!(bucket.try_consume(1, 1.0, now + Duration::from_secs(1)));
        assert!(!bucket.try_consume(1, 1.0, now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_limiter_burst_then_refill() {
        let limiter = TokenBucketLimiter::new(5, 1.0).unwrap();
        let now = Instant::now();
        let results: Vec<bool> = (0..5).map(|_| limiter.is_allowed_at("k", now)).collect();
        assert_eq!(results, vec![true; 5]);
        assert!(!limiter.is_allowed_at("k", now));
        assert!(limiter.is_allowed_at("k", now + Duration::from_millis(1000)));
        assert!(!limiter.is_allowed_at("k", now + Duration::from_millis(1000)));
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let limiter = TokenBucketLimiter::with_prefix(1, 1.0, "api").unwrap();
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
        assert_eq!(limiter.tracked_identities(), 2);
        assert_eq!(limiter.name(), "token_bucket_rate_limiter:api");
    }

    #[tokio::test]
    async fn test_decision_reports_remaining_and_retry() {
        let limiter = TokenBucketLimiter::new(2, 0.5).unwrap();
        let now = Instant::now();

        let first = limiter.check_at("k", now);
        assert_eq!((first.allowed, first.limit, first.remaining), (true, 2, 1));
        assert_eq!(first.retry_after, Duration::ZERO);
        assert_eq!(limiter.check_at("k", now).remaining, 0);

        let denied = limiter.check_at("k", now + Duration::from_millis(500));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Duration::from_millis(1500));
        assert!(limiter.is_allowed_at("k", now + Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_unprefixed_cache_name() {
        let limiter = TokenBucketLimiter::new(1, 1.0).unwrap();
        assert_eq!(limiter.name(), "token_bucket_rate_limiter");
    }

    #[tokio::test]
    async fn test_invalid_configuration_rejected() {
        assert!(matches!(
            TokenBucketLimiter::new(0, 1.0),
            Err(ThrottlerError::Configuration(_))
        ));
        assert!(matches!(
            TokenBucketLimiter::new(5, 0.0),
            Err(ThrottlerError::Configuration(_))
        ));
        assert!(matches!(
            TokenBucketLimiter::new(5, -2.0),
            Err(ThrottlerError::Configuration(_))
        ));
    }
}
