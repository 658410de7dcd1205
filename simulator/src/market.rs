//! Simulated exchange feeds.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};

use ratemesh_common::{CurrencyPair, ExchangeName, PairQuote};
use ratemesh_feeds::{FeedError, FeedResult, QuoteSource};

/// A simulated exchange feed.
///
/// Prices follow a seeded random walk around each listed pair's starting
/// mid, with a fixed spread. Faults are injected either randomly through
/// `failure_rate` or deterministically through `set_offline`.
pub struct SimulatedExchange {
    /// Exchange identifier.
    name: ExchangeName,
    /// Mid price per listed pair, advanced on every fetch.
    mids: RwLock<BTreeMap<CurrencyPair, Decimal>>,
    /// Walk and fault randomness.
    rng: Mutex<StdRng>,
    /// Probability that a fetch fails.
    failure_rate: f64,
    /// Injected per-fetch latency.
    latency: StdDuration,
    /// Deterministic outage toggle.
    offline: AtomicBool,
    /// Spread around the mid, in basis points.
    spread_bps: i64,
}

impl SimulatedExchange {
    /// Create a new simulated exchange.
    pub fn new(
        name: ExchangeName,
        seed: u64,
        failure_rate: f64,
        latency: StdDuration,
    ) -> Self {
        Self {
            name,
            mids: RwLock::new(BTreeMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            offline: AtomicBool::new(false),
            spread_bps: 20,
        }
    }

    /// Exchange identifier.
    pub fn name(&self) -> &ExchangeName {
        &self.name
    }

    /// List a pair with its starting mid price.
    pub async fn list_pair(&self, pair: CurrencyPair, mid: Decimal) {
        self.mids.write().await.insert(pair, mid);
    }

    /// Toggle a deterministic outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Whether the exchange is currently offline.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl QuoteSource for SimulatedExchange {
    async fn fetch_quotes(&self) -> FeedResult<Vec<PairQuote>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.is_offline() {
            return Err(FeedError::SourceFailed(format!("{} is offline", self.name)));
        }

        let mut mids = self.mids.write().await;
        let mut rng = self.rng.lock().await;

        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return Err(FeedError::SourceFailed(format!(
                "{} dropped the connection",
                self.name
            )));
        }

        let half_spread_factor = Decimal::new(self.spread_bps, 4) / Decimal::TWO;
        let mut quotes = Vec::with_capacity(mids.len());
        for (pair, mid) in mids.iter_mut() {
            *mid = walk(&mut rng, *mid);
            let half_spread = (*mid * half_spread_factor).round_dp(8);
            quotes.push(PairQuote::new(
                pair.clone(),
                *mid - half_spread,
                *mid + half_spread,
            ));
        }

        Ok(quotes)
    }
}

/// Advance a mid price one random-walk step of at most ±0.5%.
fn walk(rng: &mut StdRng, mid: Decimal) -> Decimal {
    let step_bps: i64 = rng.gen_range(-50..=50);
    (mid * (Decimal::ONE + Decimal::new(step_bps, 4))).round_dp(8)
}

/// Factory for creating simulated exchanges.
pub struct MarketFactory;

impl MarketFactory {
    /// Create N simulated exchanges with related seeds.
    pub fn create_exchanges(
        count: usize,
        failure_rate: f64,
        latency: StdDuration,
        seed: u64,
    ) -> Vec<Arc<SimulatedExchange>> {
        let exchange_names = [
            "kraken", "bitfinex", "coindesk", "gemini", "bitstamp", "poloniex", "coinbase",
            "binance", "huobi", "okx",
        ];

        (0..count)
            .map(|i| {
                let name = if i < exchange_names.len() {
                    exchange_names[i].to_string()
                } else {
                    format!("exchange{}", i + 1)
                };
                Arc::new(SimulatedExchange::new(
                    ExchangeName::new(name),
                    seed.wrapping_add(i as u64),
                    failure_rate,
                    latency,
                ))
            })
            .collect()
    }
}
