use crate::algorithms::{
    cache_name, FixedWindowLimiter, LeakyBucketLimiter, RateLimiter, TokenBucketLimiter,
};
use crate::cache::CacheOptions;
use crate::error::ThrottlerResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Declarative limiter configuration, tagged by algorithm.
///
/// ```json
/// { "strategy": "fixed_window", "limit": 3, "window": "10s" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RateLimitStrategy {
    TokenBucket(TokenBucketConfig),
    LeakyBucket(LeakyBucketConfig),
    FixedWindow(FixedWindowConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenBucketConfig {
    #[validate(range(min = 1))]
    pub capacity: u64,
    #[validate(range(exclusive_min = 0.0))]
    pub refill_rate: f64,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_max_idle", with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub max_idle: Duration,
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LeakyBucketConfig {
    #[validate(range(min = 1))]
    pub capacity: u64,
    #[validate(range(exclusive_min = 0.0))]
    pub leak_rate: f64,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_max_idle", with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub max_idle: Duration,
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FixedWindowConfig {
    #[validate(range(min = 1))]
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub window: Duration,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
}

/// Background task tuning shared by every strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheSettings {
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub sweep_interval: Duration,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            warning_threshold: default_warning_threshold(),
        }
    }
}

impl CacheSettings {
    fn options(&self, name: String, max_idle: Duration) -> CacheOptions {
        CacheOptions::new(name, max_idle)
            .with_sweep_interval(self.sweep_interval)
            .with_warning_threshold(self.warning_threshold)
    }
}

fn default_max_idle() -> Duration {
    TokenBucketLimiter::DEFAULT_MAX_IDLE
}

fn default_sweep_interval() -> Duration {
    CacheOptions::DEFAULT_SWEEP_INTERVAL
}

fn default_warning_threshold() -> usize {
    CacheOptions::DEFAULT_WARNING_THRESHOLD
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("non_zero_duration")
            .with_message("duration must be greater than 0".into()));
    }
    Ok(())
}

impl RateLimitStrategy {
    pub fn token_bucket(capacity: u64, refill_rate: f64) -> Self {
        Self::TokenBucket(TokenBucketConfig {
            capacity,
            refill_rate,
            key_prefix: String::new(),
            max_idle: default_max_idle(),
            cache: CacheSettings::default(),
        })
    }

    pub fn leaky_bucket(capacity: u64, leak_rate: f64) -> Self {
        Self::LeakyBucket(LeakyBucketConfig {
            capacity,
            leak_rate,
            key_prefix: String::new(),
            max_idle: default_max_idle(),
            cache: CacheSettings::default(),
        })
    }

    pub fn fixed_window(limit: u64, window: Duration) -> Self {
        Self::FixedWindow(FixedWindowConfig {
            limit,
            window,
            key_prefix: String::new(),
            cache: CacheSettings::default(),
        })
    }

    /// Replaces the key prefix, which also names the backing cache.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        match &mut self {
            Self::TokenBucket(config) => config.key_prefix = prefix,
            Self::LeakyBucket(config) => config.key_prefix = prefix,
            Self::FixedWindow(config) => config.key_prefix = prefix,
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenBucket(_) => "token_bucket",
            Self::LeakyBucket(_) => "leaky_bucket",
            Self::FixedWindow(_) => "fixed_window",
        }
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        match self {
            Self::TokenBucket(config) => config.validate()?,
            Self::LeakyBucket(config) => config.validate()?,
            Self::FixedWindow(config) => config.validate()?,
        }
        Ok(())
    }

    /// Validates the configuration and constructs the limiter. Must be called
    /// inside a tokio runtime.
    pub fn build(&self) -> ThrottlerResult<Box<dyn RateLimiter>> {
        self.validate()?;

        let limiter: Box<dyn RateLimiter> = match self {
            Self::TokenBucket(config) => {
                let options = config.cache.options(
                    cache_name("token_bucket_rate_limiter", &config.key_prefix),
                    config.max_idle,
                );
                Box::new(TokenBucketLimiter::with_cache_options(
                    config.capacity,
                    config.refill_rate,
                    config.key_prefix.clone(),
                    options,
                )?)
            }
            Self::LeakyBucket(config) => {
                let options = config.cache.options(
                    cache_name("leaky_bucket_rate_limiter", &config.key_prefix),
                    config.max_idle,
                );
                Box::new(LeakyBucketLimiter::with_cache_options(
                    config.capacity,
                    config.leak_rate,
                    config.key_prefix.clone(),
                    options,
                )?)
            }
            Self::FixedWindow(config) => {
                let options = config.cache.options(
                    cache_name("fixed_window_rate_limiter", &config.key_prefix),
                    config.window,
                );
                Box::new(FixedWindowLimiter::with_cache_options(
                    config.limit,
                    config.key_prefix.clone(),
                    options,
                )?)
            }
        };

        tracing::info!(strategy = self.kind(), cache = %limiter.name(), "Rate limiter created");
        Ok(limiter)
    }
}
