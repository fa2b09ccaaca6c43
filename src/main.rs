use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tokengate::{Mode, RateLimiter, TokengateConfig};

/// Command-line access to a tokengate limiter.
#[derive(Debug, Parser)]
#[command(name = "tokengate", version, about)]
struct Cli {
    /// YAML configuration file; `TOKENGATE__*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one admission check and print the decision as JSON
    Check {
        identity: String,
        #[arg(long, default_value_t = 1)]
        cost: u64,
    },
    /// Probe Redis connectivity
    Health,
    /// Print the Redis server clock
    Time,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TokengateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let limiter = RateLimiter::from_config(&config).context("creating rate limiter")?;
    info!(
        namespace = %limiter.namespace(),
        mode = ?limiter.mode(),
        fail_strategy = ?limiter.fail_strategy(),
        "Rate limiter initialized"
    );

    match cli.command {
        Command::Check { identity, cost } => check(limiter, identity, cost).await,
        Command::Health => health(&limiter).await,
        Command::Time => time(&limiter).await,
    }
}

async fn check(limiter: RateLimiter, identity: String, cost: u64) -> anyhow::Result<()> {
    let admission = match limiter.mode() {
        Mode::Async => limiter.decide_async(&identity, cost).await?,
        Mode::Blocking => {
            let limiter = limiter.clone();
            let identity = identity.clone();
            tokio::task::spawn_blocking(move || limiter.decide(&identity, cost)).await??
        }
    };

    // Relative headers are computed against the same clock that produced `reset`.
    let pairs = match admission.info {
        Some(info) => match server_time(&limiter).await {
            Ok(now) => info.headers_at(now as u64),
            Err(e) => {
                warn!(error = %e, "Could not read Redis clock, using local time for headers");
                info.headers()
            }
        },
        None => Vec::new(),
    };
    let headers: serde_json::Map<String, serde_json::Value> = pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();

    let output = json!({
        "identity": identity,
        "allowed": admission.allowed,
        "info": admission.info,
        "headers": headers,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn health(limiter: &RateLimiter) -> anyhow::Result<()> {
    let healthy = match limiter.mode() {
        Mode::Async => limiter.health_check_async().await?,
        Mode::Blocking => {
            let limiter = limiter.clone();
            tokio::task::spawn_blocking(move || limiter.health_check()).await??
        }
    };

    if !healthy {
        bail!("Redis is unreachable");
    }
    println!("healthy");
    Ok(())
}

async fn server_time(limiter: &RateLimiter) -> anyhow::Result<f64> {
    let seconds = match limiter.mode() {
        Mode::Async => limiter.server_time_async().await?,
        Mode::Blocking => {
            let limiter = limiter.clone();
            tokio::task::spawn_blocking(move || limiter.server_time()).await??
        }
    };
    Ok(seconds)
}

async fn time(limiter: &RateLimiter) -> anyhow::Result<()> {
    let seconds = server_time(limiter).await?;

    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9) as u32;
    let rendered = chrono::DateTime::from_timestamp(secs, nanos)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    println!("{}", json!({ "seconds": seconds, "rfc3339": rendered }));
    Ok(())
}
