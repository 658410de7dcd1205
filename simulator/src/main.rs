//! RateMesh Simulator
//!
//! Drives simulated exchange feeds through the rate engine to exercise
//! caching, query dedup, and fallback behavior under injected faults.

use clap::Parser;
use ratemesh_common::CurrencyPair;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod market;
mod scenario;
mod controller;
mod metrics;

use controller::{SimulationConfig, SimulationController};
use scenario::Scenario;

/// RateMesh Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "RateMesh rate engine simulation environment")]
struct Args {
    /// Number of simulated exchanges to create
    #[arg(short, long, default_value = "3")]
    exchanges: usize,

    /// Pairs to resolve each round (comma separated, BASE_QUOTE form)
    #[arg(short, long, default_value = "BTC_USD,ETH_USD,ETH_BTC")]
    pairs: String,

    /// Scenario to run
    #[arg(short, long)]
    scenario: Option<String>,

    /// Rounds to run when no scenario is given
    #[arg(short, long, default_value = "10")]
    rounds: usize,

    /// Delay between rounds in milliseconds
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Probability of a simulated feed failure per fetch
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Injected feed latency in milliseconds
    #[arg(long, default_value = "20")]
    latency_ms: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting RateMesh Simulator");
    info!("Exchanges: {}", args.exchanges);
    info!("Pairs: {}", args.pairs);

    let config = SimulationConfig {
        exchange_count: args.exchanges,
        pairs: parse_pairs(&args.pairs)?,
        failure_rate: args.failure_rate,
        feed_latency: std::time::Duration::from_millis(args.latency_ms),
        seed: args.seed.unwrap_or_else(rand::random),
    };

    let controller = SimulationController::new(config)?;
    controller.initialize().await?;

    if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        info!("Running {} rounds", args.rounds);
        controller
            .run_rounds(
                args.rounds,
                std::time::Duration::from_millis(args.interval_ms),
            )
            .await?;
    }

    let metrics = controller.metrics().await;
    let engine = controller.engine_metrics();
    let latency = metrics.latency();
    info!("Simulation complete");
    info!("Requests: {}", metrics.requests());
    info!("Resolved: {}", metrics.resolved);
    info!("Failed: {}", metrics.failed);
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    info!(
        "Latency: mean {}ms, p50 {}ms, p99 {}ms, max {}ms",
        latency.mean, latency.p50, latency.p99, latency.max
    );
    info!(
        "Exchange queries: {} ({} failed)",
        engine.exchange_queries, engine.exchange_failures
    );
    info!(
        "Fallbacks: {} attempted, {} resolved",
        engine.fallbacks_attempted, engine.fallbacks_resolved
    );

    Ok(())
}

/// Parse the comma separated pair list.
fn parse_pairs(list: &str) -> anyhow::Result<Vec<CurrencyPair>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| CurrencyPair::parse(s).map_err(anyhow::Error::from))
        .collect()
}
