//! Simulation controller.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ratemesh_common::{pair, CurrencyPair, DurationExt, ExchangeName};
use ratemesh_engine::{EngineMetricsSnapshot, RateOrchestrator};
use ratemesh_feeds::{CachingQuoteProvider, ExchangeRegistry, FeedSettings, QuoteSource};
use ratemesh_rules::RuleSet;

use crate::market::{MarketFactory, SimulatedExchange};
use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};

/// Configuration for one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of simulated exchanges.
    pub exchange_count: usize,
    /// Pairs resolved each round.
    pub pairs: Vec<CurrencyPair>,
    /// Probability of a feed failure per fetch.
    pub failure_rate: f64,
    /// Injected feed latency.
    pub feed_latency: StdDuration,
    /// Seed for price walks and fault drawing.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            exchange_count: 3,
            pairs: vec![pair("BTC", "USD"), pair("ETH", "USD")],
            failure_rate: 0.0,
            feed_latency: StdDuration::from_millis(10),
            seed: 42,
        }
    }
}

/// Drives batches of rate requests through the engine.
///
/// The first exchange backs the primary rules, the second the fallback
/// rules; every exchange lists every configured pair.
pub struct SimulationController {
    config: SimulationConfig,
    exchanges: Vec<Arc<SimulatedExchange>>,
    orchestrator: RateOrchestrator,
    rules: RuleSet,
    metrics: RwLock<SimulationMetrics>,
}

impl SimulationController {
    /// Build the market, registry, and rules for a run.
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        if config.exchange_count == 0 {
            return Err(anyhow::anyhow!("at least one exchange is required"));
        }
        if config.pairs.is_empty() {
            return Err(anyhow::anyhow!("at least one pair is required"));
        }

        let exchanges = MarketFactory::create_exchanges(
            config.exchange_count,
            config.failure_rate,
            config.feed_latency,
            config.seed,
        );

        let registry = ExchangeRegistry::new();
        for exchange in &exchanges {
            let source: Arc<dyn QuoteSource> = exchange.clone();
            registry.register(CachingQuoteProvider::new(
                exchange.name().clone(),
                source,
                Self::feed_settings(),
            ));
        }

        let rules = Self::build_rules(&exchanges)?;

        Ok(Self {
            config,
            exchanges,
            orchestrator: RateOrchestrator::new(Arc::new(registry)),
            rules,
            metrics: RwLock::new(SimulationMetrics::default()),
        })
    }

    /// Short staleness windows so scenarios can see every cache band.
    fn feed_settings() -> FeedSettings {
        FeedSettings {
            refresh_rate: Duration::milliseconds(300),
            validity_time: Duration::milliseconds(1200),
        }
    }

    /// Primary rules on the first exchange, fallback on the second.
    fn build_rules(exchanges: &[Arc<SimulatedExchange>]) -> anyhow::Result<RuleSet> {
        let primary = exchanges
            .first()
            .map(|e| format!("X_X = {}(X_X);", e.name()))
            .unwrap_or_default();
        let fallback = exchanges
            .get(1)
            .map(|e| format!("X_X = {}(X_X);", e.name()));

        Ok(RuleSet::parse(&primary, fallback.as_deref())?)
    }

    /// Seed every exchange's book for the configured pairs.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        info!("Initializing market with {} exchanges", self.exchanges.len());

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        for pair in &self.config.pairs {
            // One canonical mid per pair; each exchange starts within 1% of it.
            let mid = Decimal::from(rng.gen_range(50..50_000));
            for exchange in &self.exchanges {
                let offset: i64 = rng.gen_range(-100..=100);
                let start = (mid * (Decimal::ONE + Decimal::new(offset, 4))).round_dp(8);
                exchange.list_pair(pair.clone(), start).await;
                debug!(exchange = %exchange.name(), pair = %pair, mid = %start, "Listed pair");
            }
        }

        info!(
            "Market initialized with {} pairs per exchange",
            self.config.pairs.len()
        );
        Ok(())
    }

    /// Run plain rounds at a fixed cadence.
    pub async fn run_rounds(&self, rounds: usize, interval: StdDuration) -> anyhow::Result<()> {
        for round in 1..=rounds {
            self.run_round(round).await;
            if round < rounds {
                tokio::time::sleep(interval).await;
            }
        }
        Ok(())
    }

    /// Run a scripted scenario.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            "Running scenario: {} - {}",
            scenario.name, scenario.description
        );

        let mut round = 0usize;
        for step in &scenario.steps {
            self.execute_step(step, &mut round).await;
        }

        Ok(())
    }

    /// Resolve every configured pair once and record the outcomes.
    async fn run_round(&self, round: usize) {
        let mut batch = self.orchestrator.fetch_rates(&self.config.pairs, &self.rules);
        let pending: Vec<_> = self
            .config
            .pairs
            .iter()
            .filter_map(|pair| batch.take(pair))
            .collect();

        let results = futures::future::join_all(pending.into_iter().map(|p| async move {
            let pair = p.pair().clone();
            let result = p.wait().await;
            (pair, result)
        }))
        .await;

        let mut resolved = 0usize;
        let total = results.len();
        let mut metrics = self.metrics.write().await;
        for (pair, result) in results {
            let latency_ms = result.latency.as_millis() as u64;
            match &result.bid_ask {
                Some(bid_ask) => {
                    resolved += 1;
                    metrics.record_resolved(latency_ms);
                    debug!(pair = %pair, rate = %bid_ask, latency_ms, "Pair resolved");
                }
                None => {
                    metrics.record_failed();
                    if let Ok(json) = serde_json::to_string(&result) {
                        debug!(pair = %pair, result = %json, "Pair failed");
                    }
                }
            }
        }
        drop(metrics);

        info!(round, resolved, failed = total - resolved, "Round complete");
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep, round: &mut usize) {
        match step {
            ScenarioStep::RunRound => {
                *round += 1;
                self.run_round(*round).await;
            }
            ScenarioStep::RunRounds { rounds } => {
                for _ in 0..*rounds {
                    *round += 1;
                    self.run_round(*round).await;
                    tokio::time::sleep(StdDuration::from_millis(200)).await;
                }
            }
            ScenarioStep::Wait { millis } => {
                info!("Waiting {}ms", millis);
                tokio::time::sleep(StdDuration::from_millis(*millis)).await;
            }
            ScenarioStep::TakeOffline { exchange } => {
                self.set_exchange_offline(exchange, true);
            }
            ScenarioStep::BringOnline { exchange } => {
                self.set_exchange_offline(exchange, false);
            }
            ScenarioStep::ExpireCaches => {
                let wait = Self::feed_settings().validity_time + Duration::milliseconds(300);
                info!("Letting caches expire ({}ms)", wait.num_milliseconds());
                tokio::time::sleep(wait.as_std()).await;
            }
        }
    }

    fn set_exchange_offline(&self, name: &str, offline: bool) {
        let target = ExchangeName::new(name);
        match self.exchanges.iter().find(|e| e.name() == &target) {
            Some(exchange) => {
                exchange.set_offline(offline);
                info!(exchange = %target, offline, "Toggled exchange fault");
            }
            None => warn!(exchange = %target, "Exchange not found"),
        }
    }

    /// Simulation-level metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Engine-level counters.
    pub fn engine_metrics(&self) -> EngineMetricsSnapshot {
        self.orchestrator.metrics().snapshot()
    }
}
