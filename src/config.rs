use crate::error::{ThrottlerError, ThrottlerResult};
use crate::key_generator::KeyStrategy;
use crate::rate_limit_config::RateLimitStrategy;
use clap::{Args, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
}

/// Service configuration, read from flags with environment fallbacks
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Rate limiting algorithm
    #[arg(long, env = "RATE_LIMIT_ALGORITHM", value_enum, default_value = "token-bucket")]
    pub algorithm: Algorithm,

    /// Bucket capacity, or the request limit for a fixed window
    #[arg(long, env = "RATE_LIMIT_CAPACITY", default_value_t = 10)]
    pub capacity: u64,

    /// Refill or leak rate in requests per second
    #[arg(long, env = "RATE_LIMIT_RATE", default_value_t = 1.0)]
    pub rate: f64,

    /// Fixed window idle duration, e.g. "10s"
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW",
        default_value = "60s",
        value_parser = humantime_serde::re::humantime::parse_duration
    )]
    pub window: Duration,

    /// What requests are partitioned by
    #[arg(long, env = "RATE_LIMIT_KEY", value_enum, default_value = "path")]
    pub key_strategy: KeyStrategy,

    /// Namespace prepended to every identity
    #[arg(long, env = "RATE_LIMIT_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// JSON limiter configuration; overrides the algorithm flags when set
    #[arg(long, env = "LIMITER_CONFIG")]
    pub limiter_config: Option<PathBuf>,
}

impl Config {
    /// Resolve the limiter configuration from the JSON file or the flags
    pub fn strategy(&self) -> ThrottlerResult<RateLimitStrategy> {
        if let Some(path) = &self.limiter_config {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                ThrottlerError::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let strategy: RateLimitStrategy = serde_json::from_str(&raw).map_err(|e| {
                ThrottlerError::Configuration(format!("Invalid limiter config {}: {}", path.display(), e))
            })?;
            strategy.validate()?;
            return Ok(strategy);
        }

        let strategy = match self.algorithm {
            Algorithm::TokenBucket => RateLimitStrategy::token_bucket(self.capacity, self.rate),
            Algorithm::LeakyBucket => RateLimitStrategy::leaky_bucket(self.capacity, self.rate),
            Algorithm::FixedWindow => RateLimitStrategy::fixed_window(self.capacity, self.window),
        };
        let strategy = strategy.with_key_prefix(self.key_prefix.clone());
        strategy.validate()?;
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        TestCli::parse_from(std::iter::once("test").chain(args.iter().copied())).config
    }

    #[test]
    fn test_flags_build_fixed_window() {
        let config = parse(&[
            "--algorithm",
            "fixed-window",
            "--capacity",
            "3",
            "--window",
            "10s",
            "--key-strategy",
            "ip-address",
        ]);
        assert_eq!(config.key_strategy, KeyStrategy::IpAddress);
        match config.strategy().unwrap() {
            RateLimitStrategy::FixedWindow(fw) => {
                assert_eq!(fw.limit, 3);
                assert_eq!(fw.window, Duration::from_secs(10));
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_zero_rate_rejected() {
        let config = parse(&["--rate", "0"]);
        assert!(config.strategy().is_err());
    }

    #[test]
    fn test_missing_limiter_file_is_configuration_error() {
        let config = parse(&["--limiter-config", "/definitely/not/here.json"]);
        assert!(matches!(
            config.strategy(),
            Err(ThrottlerError::Configuration(_))
        ));
    }
}
