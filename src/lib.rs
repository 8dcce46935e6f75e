pub mod algorithms;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod response;
pub mod server;

pub use algorithms::{
    Decision, FixedWindowLimiter, LeakyBucketLimiter, RateLimiter, TokenBucketLimiter,
};
pub use cache::{Cache, CacheOptions, TtlCache};
pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use rate_limit_config::RateLimitStrategy;
pub use server::create_app;
