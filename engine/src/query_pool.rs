//! Per-batch deduplication of exchange queries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use ratemesh_common::{ExchangeError, ExchangeName};
use ratemesh_feeds::{ExchangeFetch, ExchangeRegistry};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::metrics::EngineMetrics;

type SharedQuery = watch::Receiver<Option<Arc<ExchangeFetch>>>;

/// Shares one registry query per exchange within a batch.
///
/// The first subscriber for an exchange spawns the query and installs a
/// receiver; later subscribers attach to the same receiver. The spawned
/// query runs to completion even if every subscriber is dropped, so one
/// cancelled pair never poisons another pair waiting on the same exchange.
pub(crate) struct QueryPool {
    registry: Arc<ExchangeRegistry>,
    metrics: Arc<EngineMetrics>,
    queries: Mutex<HashMap<ExchangeName, SharedQuery>>,
}

impl QueryPool {
    pub(crate) fn new(registry: Arc<ExchangeRegistry>, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            registry,
            metrics,
            queries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the outcome for every exchange in the set.
    ///
    /// Subscribes to all exchanges up front so the underlying queries run
    /// concurrently, then awaits each in turn.
    pub(crate) async fn fetch_all(
        &self,
        exchanges: &BTreeSet<ExchangeName>,
    ) -> Vec<Arc<ExchangeFetch>> {
        let subscriptions: Vec<(ExchangeName, SharedQuery)> = exchanges
            .iter()
            .map(|exchange| (exchange.clone(), self.subscribe(exchange)))
            .collect();

        let mut fetches = Vec::with_capacity(subscriptions.len());
        for (exchange, query) in subscriptions {
            fetches.push(settle(exchange, query).await);
        }
        fetches
    }

    /// Attach to the exchange's shared query, starting it on first use.
    fn subscribe(&self, exchange: &ExchangeName) -> SharedQuery {
        let mut queries = self.queries.lock();
        if let Some(query) = queries.get(exchange) {
            return query.clone();
        }

        debug!(exchange = %exchange, "Starting shared exchange query");
        self.metrics.exchange_query_started();

        let (tx, rx) = watch::channel(None);
        let registry = Arc::clone(&self.registry);
        let metrics = Arc::clone(&self.metrics);
        let name = exchange.clone();
        tokio::spawn(async move {
            let fetch = registry.query(&name).await;
            if fetch.failed() {
                metrics.exchange_query_failed();
            }
            let _ = tx.send(Some(Arc::new(fetch)));
        });

        queries.insert(exchange.clone(), rx.clone());
        rx
    }
}

/// Wait for a shared query to publish its outcome.
async fn settle(exchange: ExchangeName, mut query: SharedQuery) -> Arc<ExchangeFetch> {
    let settled = query.wait_for(|fetch| fetch.is_some()).await;
    if let Ok(fetch) = settled {
        if let Some(fetch) = fetch.as_ref() {
            return Arc::clone(fetch);
        }
    }

    // The sender was lost before publishing, which only happens if the
    // query task itself died. Degrade to a failed fetch.
    warn!(exchange = %exchange, "Exchange query task died before publishing");
    Arc::new(ExchangeFetch {
        exchange: exchange.clone(),
        quotes: Vec::new(),
        error: Some(ExchangeError::new(exchange, "exchange query task failed")),
        latency: StdDuration::ZERO,
    })
}
