use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use throttlekeeper::algorithms::{LeakyBucketLimiter, RateLimiter, TokenBucketLimiter};
use throttlekeeper::config::Config;
use throttlekeeper::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "throttlekeeper", version, about = "In-process rate limiting service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the rate limited HTTP API
    Serve(Config),
    /// Compare token bucket and leaky bucket decisions for two bursty users
    Simulate {
        #[arg(long, default_value_t = 5)]
        capacity: u64,
        #[arg(long, default_value_t = 1.0)]
        rate: f64,
    },
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("throttlekeeper={},tower_http=debug", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => {
            init_tracing(&config.log_level);
            tracing::info!("Starting throttlekeeper service");
            tracing::info!(
                "Configuration: bind_addr={}, algorithm={:?}, key_strategy={:?}",
                config.bind_addr,
                config.algorithm,
                config.key_strategy
            );

            let server = Server::new(&config)
                .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;
            server.run().await?;
        }
        Command::Simulate { capacity, rate } => {
            init_tracing("warn");
            simulate(capacity, rate).await?;
        }
    }

    Ok(())
}

async fn simulate(capacity: u64, rate: f64) -> Result<()> {
    let token_bucket = TokenBucketLimiter::with_prefix(capacity, rate, "test_token")?;
    let leaky_bucket = LeakyBucketLimiter::with_prefix(capacity, rate, "test_leaky")?;
    let users = ["user1", "user2"];

    println!("Bucket capacity: {}, rate: {:.2} requests/second", capacity, rate);

    let probe = |phase: &str, round: usize| {
        for user in users {
            println!(
                "{} request {} for {}: token = {}, leaky = {}",
                phase,
                round,
                user,
                token_bucket.is_allowed(user),
                leaky_bucket.is_allowed(user)
            );
        }
    };

    println!("\n--- Phase 1: initial burst ---");
    for round in 1..=10 {
        probe("Burst", round);
        tokio::time::sleep(Duration::from_millis(100 * (round as u64 % 5))).await;
    }

    println!("\n--- Phase 2: sustained traffic ---");
    for round in 1..=10 {
        tokio::time::sleep(Duration::from_millis(500 + 100 * (round as u64 % 10))).await;
        probe("Sustained", round);
    }

    println!("\n--- Phase 3: recovery burst ---");
    tokio::time::sleep(Duration::from_secs(5)).await;
    for round in 1..=10 {
        probe("Recovery", round);
        tokio::time::sleep(Duration::from_millis(100 * (round as u64 % 5))).await;
    }

    token_bucket.shutdown();
    leaky_bucket.shutdown();
    Ok(())
}
