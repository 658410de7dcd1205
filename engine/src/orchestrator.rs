//! Batch resolution of currency pairs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use ratemesh_common::{CurrencyPair, ExchangeError};
use ratemesh_feeds::ExchangeRegistry;
use ratemesh_rules::{Evaluation, RuleInstance, RuleSet};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::metrics::EngineMetrics;
use crate::phase::FetchPhase;
use crate::query_pool::QueryPool;
use crate::result::RateResult;

/// Resolves batches of currency pairs against registered exchanges.
///
/// The orchestrator owns no rules; callers pass a [`RuleSet`] per request so
/// different consumers can resolve against different rule collections over
/// the same registry.
pub struct RateOrchestrator {
    /// Exchange providers, built at startup and shared with the process.
    registry: Arc<ExchangeRegistry>,
    /// Aggregated counters across batches.
    metrics: Arc<EngineMetrics>,
}

impl RateOrchestrator {
    /// Create an orchestrator over the given registry.
    pub fn new(registry: Arc<ExchangeRegistry>) -> Self {
        Self {
            registry,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Registry this orchestrator queries.
    pub fn registry(&self) -> &Arc<ExchangeRegistry> {
        &self.registry
    }

    /// Aggregated metrics.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Start resolving a batch of pairs against the rule set.
    ///
    /// Returns immediately; results are awaited through the returned
    /// [`RateBatch`]. Duplicate pairs collapse into a single pipeline, and
    /// each distinct exchange is queried at most once for the whole batch,
    /// fallback attempts included. Must be called from within a Tokio
    /// runtime.
    pub fn fetch_rates(&self, pairs: &[CurrencyPair], rules: &RuleSet) -> RateBatch {
        let batch_id = Uuid::now_v7();
        let rules = Arc::new(rules.clone());
        let pool = Arc::new(QueryPool::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
        ));

        self.metrics.batch_started();
        info!(batch_id = %batch_id, pairs = pairs.len(), "Starting rate batch");

        let mut pending = BTreeMap::new();
        for pair in pairs {
            if pending.contains_key(pair) {
                continue;
            }
            self.metrics.pair_requested();
            let handle = tokio::spawn(resolve_pair(
                batch_id,
                pair.clone(),
                Arc::clone(&rules),
                Arc::clone(&pool),
                Arc::clone(&self.metrics),
            ));
            pending.insert(
                pair.clone(),
                PendingRate {
                    pair: pair.clone(),
                    handle,
                },
            );
        }

        RateBatch {
            id: batch_id,
            pending,
        }
    }

    /// Resolve a single pair, awaited to completion.
    pub async fn fetch_rate(&self, pair: &CurrencyPair, rules: &RuleSet) -> RateResult {
        let batch = self.fetch_rates(std::slice::from_ref(pair), rules);
        let mut results = batch.wait_all().await;
        results
            .remove(pair)
            .unwrap_or_else(|| RateResult::unavailable("pair missing from batch"))
    }
}

/// Handle on one pair's in-flight resolution.
pub struct PendingRate {
    pair: CurrencyPair,
    handle: JoinHandle<RateResult>,
}

impl PendingRate {
    /// Pair this handle resolves.
    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    /// Wait for the pipeline to finish.
    ///
    /// Dropping the handle instead abandons only this waiter; the pipeline
    /// and its shared exchange queries keep running for the rest of the
    /// batch.
    pub async fn wait(self) -> RateResult {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => {
                warn!(pair = %self.pair, error = %err, "Rate pipeline task died");
                RateResult::unavailable(format!("rate pipeline failed: {err}"))
            }
        }
    }
}

/// In-flight results of one `fetch_rates` call, keyed by pair.
pub struct RateBatch {
    id: Uuid,
    pending: BTreeMap<CurrencyPair, PendingRate>,
}

impl RateBatch {
    /// Batch identifier carried on the pipeline log spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of pairs still attached to the batch.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Detach one pair's pending result for individual awaiting.
    pub fn take(&mut self, pair: &CurrencyPair) -> Option<PendingRate> {
        self.pending.remove(pair)
    }

    /// Wait for every pair still attached to the batch.
    pub async fn wait_all(self) -> BTreeMap<CurrencyPair, RateResult> {
        let mut results = BTreeMap::new();
        for (pair, pending) in self.pending {
            results.insert(pair, pending.wait().await);
        }
        results
    }
}

/// Outcome of evaluating one bound instance against the query pool.
struct Attempt {
    evaluation: Evaluation,
    exchange_errors: Vec<ExchangeError>,
    latency: StdDuration,
}

/// One pair's resolution pipeline: bind, query, evaluate, fall back.
#[instrument(skip(rules, pool, metrics), fields(batch_id = %batch_id, pair = %pair))]
async fn resolve_pair(
    batch_id: Uuid,
    pair: CurrencyPair,
    rules: Arc<RuleSet>,
    pool: Arc<QueryPool>,
    metrics: Arc<EngineMetrics>,
) -> RateResult {
    let mut phase = FetchPhase::Pending;

    let mut instance = rules.primary.bind(&pair);
    advance(&mut phase, FetchPhase::DependenciesCollected);
    debug!(
        dependencies = instance.dependencies().len(),
        "Dependencies collected"
    );

    advance(&mut phase, FetchPhase::ExchangesQuerying);
    let primary = run_attempt(&mut instance, &pool).await;
    advance(&mut phase, FetchPhase::PrimaryEvaluated);

    let mut rule = instance.text();
    let mut evaluation = primary.evaluation;
    let mut exchange_errors = primary.exchange_errors;
    let mut latency = primary.latency;

    if evaluation.bid_ask.is_none() {
        if let Some(fallback) = &rules.fallback {
            debug!("Primary evaluation produced no price, trying fallback");
            metrics.fallback_attempted();
            advance(&mut phase, FetchPhase::FallbackQuerying);

            let mut fallback_instance = fallback.bind(&pair);
            let attempt = run_attempt(&mut fallback_instance, &pool).await;
            advance(&mut phase, FetchPhase::FallbackEvaluated);

            rule = fallback_instance.text();
            evaluation = attempt.evaluation;
            latency = latency.max(attempt.latency);
            merge_exchange_errors(&mut exchange_errors, attempt.exchange_errors);

            if evaluation.bid_ask.is_some() {
                metrics.fallback_resolved();
            }
        }
    }

    advance(&mut phase, FetchPhase::Done);

    match &evaluation.bid_ask {
        Some(bid_ask) => {
            metrics.pair_resolved();
            debug!(rate = %bid_ask, "Pair resolved");
        }
        None => {
            metrics.pair_failed();
            warn!(errors = evaluation.errors.len(), "Pair failed to resolve");
        }
    }

    RateResult {
        rule,
        evaluated_rule: evaluation.evaluated_text,
        bid_ask: evaluation.bid_ask,
        errors: evaluation.errors.iter().map(ToString::to_string).collect(),
        exchange_errors,
        latency,
    }
}

/// Query the instance's dependency exchanges and evaluate it.
async fn run_attempt(instance: &mut RuleInstance, pool: &QueryPool) -> Attempt {
    let fetches = pool.fetch_all(&instance.dependency_exchanges()).await;

    let mut exchange_errors = Vec::new();
    let mut latency = StdDuration::ZERO;
    for fetch in &fetches {
        latency = latency.max(fetch.latency);
        if let Some(error) = &fetch.error {
            exchange_errors.push(error.clone());
        }
        instance.supply_quotes(&fetch.quotes);
    }

    Attempt {
        evaluation: instance.evaluate(),
        exchange_errors,
        latency,
    }
}

fn advance(phase: &mut FetchPhase, next: FetchPhase) {
    if phase.can_advance_to(next) {
        debug!(from = ?phase, to = ?next, "Phase advanced");
        *phase = next;
    } else {
        warn!(from = ?phase, to = ?next, "Invalid phase transition ignored");
    }
}

/// Union exchange diagnostics, keeping the first per exchange.
fn merge_exchange_errors(into: &mut Vec<ExchangeError>, extra: Vec<ExchangeError>) {
    for error in extra {
        if into.iter().any(|existing| existing.exchange == error.exchange) {
            continue;
        }
        into.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ratemesh_common::{pair, ExchangeName, PairQuote};
    use ratemesh_feeds::{CachingQuoteProvider, FeedSettings, MockQuoteSource};
    use rust_decimal_macros::dec;

    fn test_settings() -> FeedSettings {
        FeedSettings {
            refresh_rate: Duration::milliseconds(500),
            validity_time: Duration::seconds(5),
        }
    }

    fn mock_exchange(registry: &ExchangeRegistry, name: &str) -> Arc<MockQuoteSource> {
        let source = Arc::new(MockQuoteSource::new());
        registry.register(CachingQuoteProvider::new(
            ExchangeName::new(name),
            source.clone(),
            test_settings(),
        ));
        source
    }

    #[tokio::test]
    async fn test_worked_example_resolves() {
        let registry = ExchangeRegistry::new();
        let bitfinex = mock_exchange(&registry, "bitfinex");
        bitfinex.set_quote(PairQuote::new(pair("BTG", "BTC"), dec!(0.01), dec!(0.0102)));
        let coindesk = mock_exchange(&registry, "coindesk");
        coindesk.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse(
            "BTG_X = BTG_BTC * BTC_X; BTG_BTC = bitfinex(BTG_BTC); BTC_X = coindesk(BTC_X);",
            None,
        )
        .unwrap();

        let result = orchestrator.fetch_rate(&pair("BTG", "USD"), &rules).await;

        assert!(result.is_resolved());
        let bid_ask = result.bid_ask.unwrap();
        assert_eq!(bid_ask.bid, dec!(500));
        assert_eq!(bid_ask.ask, dec!(510.102));
        assert_eq!(result.rule, "BTG_BTC * BTC_USD");
        assert_eq!(result.evaluated_rule, "(0.01, 0.0102) * (50000, 50010)");
        assert!(result.errors.is_empty());
        assert!(result.exchange_errors.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_queried_once_per_batch() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("ETH", "USD"), dec!(3000), dec!(3001)));
        kraken.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse("X_X = kraken(X_X);", None).unwrap();

        let batch = orchestrator.fetch_rates(
            &[pair("ETH", "USD"), pair("BTC", "USD"), pair("ETH", "USD")],
            &rules,
        );
        assert_eq!(batch.len(), 2);

        let results = batch.wait_all().await;
        assert!(results[&pair("ETH", "USD")].is_resolved());
        assert!(results[&pair("BTC", "USD")].is_resolved());
        assert_eq!(kraken.calls(), 1);
        assert_eq!(orchestrator.metrics().snapshot().exchange_queries, 1);
    }

    #[tokio::test]
    async fn test_fallback_reuses_batch_queries() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("ETH", "USD"), dec!(3000), dec!(3001)));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        // ghost is unregistered, so the primary formula cannot resolve.
        let rules = RuleSet::parse(
            "X_X = kraken(X_X) / ghost(X_X);",
            Some("X_X = kraken(X_X);"),
        )
        .unwrap();

        let result = orchestrator.fetch_rate(&pair("ETH", "USD"), &rules).await;

        assert!(result.is_resolved());
        assert_eq!(result.rule, "kraken(ETH_USD)");
        assert!(result.errors.is_empty());
        assert_eq!(kraken.calls(), 1);

        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.exchange_queries, 2);
        assert_eq!(snapshot.fallbacks_attempted, 1);
        assert_eq!(snapshot.fallbacks_resolved, 1);
    }

    #[tokio::test]
    async fn test_primary_failure_kept_in_exchange_errors() {
        let registry = ExchangeRegistry::new();
        let downex = mock_exchange(&registry, "downex");
        downex.fail_with("boom");
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("ETH", "USD"), dec!(3000), dec!(3001)));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules =
            RuleSet::parse("X_X = downex(X_X);", Some("X_X = kraken(X_X);")).unwrap();

        let result = orchestrator.fetch_rate(&pair("ETH", "USD"), &rules).await;

        assert!(result.is_resolved());
        assert_eq!(result.bid_ask.unwrap().bid, dec!(3000));
        // The final attempt evaluated cleanly but the primary's exchange
        // failure stays visible.
        assert!(result.errors.is_empty());
        assert_eq!(result.exchange_errors.len(), 1);
        assert_eq!(result.exchange_errors[0].exchange, ExchangeName::new("downex"));
        assert!(result.exchange_errors[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn test_failing_exchange_reported_once_per_result() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.fail_with("connection reset");

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        // Two terms depend on the same failing exchange.
        let rules = RuleSet::parse("X_X = kraken(X_X) / kraken(BTC_X);", None).unwrap();

        let result = orchestrator.fetch_rate(&pair("ETH", "USD"), &rules).await;

        assert!(result.bid_ask.is_none());
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.exchange_errors.len(), 1);
        assert_eq!(result.exchange_errors[0].exchange, ExchangeName::new("kraken"));
        assert!(result.exchange_errors[0].message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unknown_exchange_degrades_without_diagnostic() {
        let orchestrator = RateOrchestrator::new(Arc::new(ExchangeRegistry::new()));
        let rules = RuleSet::parse("X_X = ghost(X_X);", None).unwrap();

        let result = orchestrator.fetch_rate(&pair("ETH", "USD"), &rules).await;

        assert!(result.bid_ask.is_none());
        assert_eq!(
            result.errors,
            vec!["Unresolved exchange quote ghost(ETH_USD)".to_string()]
        );
        assert!(result.exchange_errors.is_empty());
    }

    #[tokio::test]
    async fn test_no_rule_for_pair() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse("BTC_USD = kraken(BTC_USD);", None).unwrap();

        let result = orchestrator.fetch_rate(&pair("ETH", "USD"), &rules).await;

        assert!(result.bid_ask.is_none());
        assert_eq!(result.rule, "");
        assert_eq!(
            result.errors,
            vec!["No rule found for pair ETH_USD".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pairs_awaitable_individually() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("ETH", "USD"), dec!(3000), dec!(3001)));
        let slowex = mock_exchange(&registry, "slowex");
        slowex.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        slowex.set_delay(std::time::Duration::from_millis(150));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse(
            "ETH_USD = kraken(ETH_USD); BTC_USD = slowex(BTC_USD);",
            None,
        )
        .unwrap();

        let mut batch =
            orchestrator.fetch_rates(&[pair("ETH", "USD"), pair("BTC", "USD")], &rules);

        let eth = batch.take(&pair("ETH", "USD")).unwrap();
        let eth_result = eth.wait().await;
        assert!(eth_result.is_resolved());

        let rest = batch.wait_all().await;
        assert!(!rest.contains_key(&pair("ETH", "USD")));
        assert!(rest[&pair("BTC", "USD")].is_resolved());
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_shared_queries_running() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("ETH", "USD"), dec!(3000), dec!(3001)));
        kraken.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        kraken.set_delay(std::time::Duration::from_millis(100));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse("X_X = kraken(X_X);", None).unwrap();

        let mut batch =
            orchestrator.fetch_rates(&[pair("ETH", "USD"), pair("BTC", "USD")], &rules);
        drop(batch.take(&pair("ETH", "USD")));

        let results = batch.wait_all().await;
        assert!(results[&pair("BTC", "USD")].is_resolved());
        assert_eq!(kraken.calls(), 1);
    }

    #[tokio::test]
    async fn test_latency_covers_slowest_query() {
        let registry = ExchangeRegistry::new();
        let slowex = mock_exchange(&registry, "slowex");
        slowex.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        slowex.set_delay(std::time::Duration::from_millis(60));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse("BTC_USD = slowex(BTC_USD);", None).unwrap();

        let result = orchestrator.fetch_rate(&pair("BTC", "USD"), &rules).await;

        assert!(result.is_resolved());
        assert!(result.latency >= StdDuration::from_millis(50));
    }

    #[tokio::test]
    async fn test_metrics_track_batch_outcomes() {
        let registry = ExchangeRegistry::new();
        let kraken = mock_exchange(&registry, "kraken");
        kraken.set_quote(PairQuote::new(pair("ETH", "USD"), dec!(3000), dec!(3001)));

        let orchestrator = RateOrchestrator::new(Arc::new(registry));
        let rules = RuleSet::parse(
            "ETH_USD = kraken(ETH_USD); BTC_USD = ghost(BTC_USD);",
            None,
        )
        .unwrap();

        let results = orchestrator
            .fetch_rates(&[pair("ETH", "USD"), pair("BTC", "USD")], &rules)
            .wait_all()
            .await;
        assert_eq!(results.len(), 2);

        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.batches_total, 1);
        assert_eq!(snapshot.pairs_requested, 2);
        assert_eq!(snapshot.pairs_resolved, 1);
        assert_eq!(snapshot.pairs_failed, 1);
        assert_eq!(snapshot.exchange_queries, 2);
    }
}
