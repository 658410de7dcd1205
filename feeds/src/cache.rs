//! Staleness-bounded quote caching with coalesced refresh.
//!
//! The provider serves an immutable snapshot through three bands of
//! age. Younger than `refresh_rate` it is returned as is. Between
//! `refresh_rate` and `validity_time` it is still returned, but one
//! background refresh is started (stale-while-revalidate). At or past
//! `validity_time`, or with no snapshot at all, callers wait for the
//! in-flight refresh to settle before getting a result. At most one
//! refresh per provider is ever in flight; concurrent callers attach
//! to it instead of starting their own.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use ratemesh_common::{age_of, now, ExchangeName, Quote, Timestamp};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{FeedError, FeedResult};
use crate::source::QuoteSource;

/// Staleness windows for one exchange feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Minimum interval between refresh attempts. Snapshots younger
    /// than this are served without touching the source.
    pub refresh_rate: Duration,
    /// Maximum age at which a snapshot may still be served. Beyond it
    /// callers wait for a fresh fetch.
    pub validity_time: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            refresh_rate: Duration::seconds(30),
            validity_time: Duration::minutes(5),
        }
    }
}

impl FeedSettings {
    /// Validate the settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_rate <= Duration::zero() {
            return Err("refresh_rate must be positive".to_string());
        }
        if self.validity_time < self.refresh_rate {
            return Err("validity_time must be at least refresh_rate".to_string());
        }
        Ok(())
    }
}

/// One fetch round's quotes. Immutable; replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct QuoteSnapshot {
    pub quotes: Vec<Quote>,
    pub fetched_at: Timestamp,
}

impl QuoteSnapshot {
    pub fn age(&self) -> Duration {
        age_of(self.fetched_at)
    }
}

/// Provider introspection.
#[derive(Debug, Clone)]
pub struct ProviderStats {
    pub exchange: ExchangeName,
    pub snapshot_age: Option<Duration>,
    pub quote_count: usize,
    pub refresh_in_flight: bool,
    pub last_failure: Option<String>,
}

#[derive(Default)]
struct RefreshState {
    /// Receiver for the in-flight refresh, if one is running. The
    /// refresh task clears this before signalling completion.
    in_flight: Option<watch::Receiver<bool>>,
    last_attempt: Option<Timestamp>,
    last_failure: Option<String>,
}

struct Inner {
    exchange: ExchangeName,
    source: Arc<dyn QuoteSource>,
    settings: FeedSettings,
    snapshot: RwLock<Option<Arc<QuoteSnapshot>>>,
    refresh: Mutex<RefreshState>,
}

/// Wraps one exchange's quote source with a staleness-bounded,
/// refresh-coalescing cache.
///
/// Cheap to clone; clones share state, so background refresh tasks can
/// own a handle.
#[derive(Clone)]
pub struct CachingQuoteProvider {
    inner: Arc<Inner>,
}

impl CachingQuoteProvider {
    pub fn new(
        exchange: ExchangeName,
        source: Arc<dyn QuoteSource>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchange,
                source,
                settings,
                snapshot: RwLock::new(None),
                refresh: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn exchange(&self) -> &ExchangeName {
        &self.inner.exchange
    }

    /// Get the current quotes under the staleness policy.
    ///
    /// Freshness is traded for availability: a stale snapshot keeps
    /// being served, with one coalesced background refresh, until it
    /// exceeds `validity_time`. Only then do callers block on the
    /// refresh, and only a failed refresh surfaces an error.
    pub async fn get_quotes(&self) -> FeedResult<Arc<QuoteSnapshot>> {
        if let Some(snapshot) = self.current_snapshot() {
            let age = snapshot.age();
            if age < self.inner.settings.refresh_rate {
                return Ok(snapshot);
            }
            if age < self.inner.settings.validity_time {
                debug!(
                    exchange = %self.inner.exchange,
                    age_ms = age.num_milliseconds(),
                    "Serving stale snapshot while revalidating"
                );
                self.spawn_refresh_if_due();
                return Ok(snapshot);
            }
        }

        // Nothing fresh enough to serve: wait for one refresh cycle.
        let mut refresh_done = self.subscribe_refresh();
        let _ = refresh_done.wait_for(|done| *done).await;
        self.settled_result()
    }

    /// The current snapshot regardless of age, if any.
    pub fn current_snapshot(&self) -> Option<Arc<QuoteSnapshot>> {
        self.inner.snapshot.read().clone()
    }

    pub fn stats(&self) -> ProviderStats {
        let snapshot = self.current_snapshot();
        let refresh = self.inner.refresh.lock();

        ProviderStats {
            exchange: self.inner.exchange.clone(),
            snapshot_age: snapshot.as_ref().map(|s| s.age()),
            quote_count: snapshot.map(|s| s.quotes.len()).unwrap_or(0),
            refresh_in_flight: refresh.in_flight.is_some(),
            last_failure: refresh.last_failure.clone(),
        }
    }

    /// Start a background refresh unless one is in flight or the last
    /// attempt was less than `refresh_rate` ago.
    fn spawn_refresh_if_due(&self) {
        let mut refresh = self.inner.refresh.lock();
        if refresh.in_flight.is_some() {
            return;
        }
        if let Some(last) = refresh.last_attempt {
            if age_of(last) < self.inner.settings.refresh_rate {
                return;
            }
        }
        self.start_refresh(&mut refresh);
    }

    /// Attach to the in-flight refresh, starting one if none exists.
    fn subscribe_refresh(&self) -> watch::Receiver<bool> {
        let mut refresh = self.inner.refresh.lock();
        if let Some(receiver) = &refresh.in_flight {
            return receiver.clone();
        }
        self.start_refresh(&mut refresh)
    }

    fn start_refresh(&self, refresh: &mut RefreshState) -> watch::Receiver<bool> {
        let (done_tx, done_rx) = watch::channel(false);
        refresh.in_flight = Some(done_rx.clone());
        refresh.last_attempt = Some(now());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_refresh(inner, done_tx).await;
        });

        done_rx
    }

    /// Outcome for a caller that waited on a refresh.
    fn settled_result(&self) -> FeedResult<Arc<QuoteSnapshot>> {
        let snapshot = self.current_snapshot();
        let last_failure = self.inner.refresh.lock().last_failure.clone();

        match snapshot {
            Some(snapshot) if snapshot.age() < self.inner.settings.validity_time => Ok(snapshot),
            Some(_) => Err(FeedError::StaleExceeded {
                exchange: self.inner.exchange.clone(),
                message: last_failure
                    .unwrap_or_else(|| "refresh did not produce fresh quotes".to_string()),
            }),
            None => Err(FeedError::SourceFailed(
                last_failure.unwrap_or_else(|| "no quotes fetched yet".to_string()),
            )),
        }
    }
}

async fn run_refresh(inner: Arc<Inner>, done_tx: watch::Sender<bool>) {
    let source = Arc::clone(&inner.source);
    // The source call runs in its own task so a panicking source is
    // recorded as a failure instead of leaving the guard wedged.
    let joined = tokio::spawn(async move { source.fetch_quotes().await }).await;

    let result = match joined {
        Ok(result) => result,
        Err(join_error) => Err(FeedError::SourceFailed(format!(
            "quote source task failed: {}",
            join_error
        ))),
    };

    match result {
        Ok(pair_quotes) => {
            let quotes: Vec<Quote> = pair_quotes
                .into_iter()
                .map(|quote| Quote::from_pair_quote(inner.exchange.clone(), quote))
                .collect();
            let count = quotes.len();
            let snapshot = Arc::new(QuoteSnapshot {
                quotes,
                fetched_at: now(),
            });

            *inner.snapshot.write() = Some(snapshot);
            {
                let mut refresh = inner.refresh.lock();
                refresh.last_failure = None;
                refresh.in_flight = None;
            }
            debug!(exchange = %inner.exchange, quotes = count, "Refreshed quote snapshot");
        }
        Err(error) => {
            {
                let mut refresh = inner.refresh.lock();
                refresh.last_failure = Some(error.to_string());
                refresh.in_flight = None;
            }
            warn!(exchange = %inner.exchange, error = %error, "Quote refresh failed");
        }
    }

    // State is settled; release the waiters.
    let _ = done_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockQuoteSource;
    use ratemesh_common::{pair, PairQuote};
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    fn test_settings() -> FeedSettings {
        FeedSettings {
            refresh_rate: Duration::milliseconds(100),
            validity_time: Duration::milliseconds(500),
        }
    }

    fn provider_with(source: Arc<MockQuoteSource>) -> CachingQuoteProvider {
        CachingQuoteProvider::new(ExchangeName::new("kraken"), source, test_settings())
    }

    #[test]
    fn test_settings_validation() {
        assert!(FeedSettings::default().validate().is_ok());

        let inverted = FeedSettings {
            refresh_rate: Duration::seconds(60),
            validity_time: Duration::seconds(30),
        };
        assert!(inverted.validate().is_err());

        let zero = FeedSettings {
            refresh_rate: Duration::zero(),
            validity_time: Duration::seconds(30),
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test]
    async fn test_fresh_snapshot_served_without_source_call() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        let provider = provider_with(source.clone());

        let first = provider.get_quotes().await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(first.quotes.len(), 1);
        // Quotes come back stamped with the provider's exchange.
        assert_eq!(first.quotes[0].exchange, ExchangeName::new("kraken"));

        let second = provider.get_quotes().await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(second.fetched_at, first.fetched_at);
    }

    #[tokio::test]
    async fn test_stale_snapshot_triggers_one_background_refresh() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        source.set_delay(StdDuration::from_millis(50));
        let provider = provider_with(source.clone());

        provider.get_quotes().await.unwrap();
        assert_eq!(source.calls(), 1);

        // Into the stale band: served immediately, revalidated once.
        tokio::time::sleep(StdDuration::from_millis(150)).await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move { provider.get_quotes().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // Let the coalesced refresh finish.
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_snapshot_waits_for_fresh_fetch() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        let provider = provider_with(source.clone());

        provider.get_quotes().await.unwrap();
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(51000), dec!(51010)));

        // Past the validity window.
        tokio::time::sleep(StdDuration::from_millis(600)).await;

        let snapshot = provider.get_quotes().await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(snapshot.quotes[0].bid_ask.bid, dec!(51000));
    }

    #[tokio::test]
    async fn test_cold_concurrent_callers_share_one_fetch() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        source.set_delay(StdDuration::from_millis(50));
        let provider = provider_with(source.clone());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move { provider.get_quotes().await }));
        }
        for handle in handles {
            let snapshot = handle.await.unwrap().unwrap();
            assert_eq!(snapshot.quotes.len(), 1);
        }

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_serving_until_validity() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(50000), dec!(50010)));
        let provider = provider_with(source.clone());

        provider.get_quotes().await.unwrap();
        source.fail_with("connection reset");

        // Stale but valid: still served, failed refresh is recorded.
        tokio::time::sleep(StdDuration::from_millis(150)).await;
        let stale = provider.get_quotes().await.unwrap();
        assert_eq!(stale.quotes[0].bid_ask.bid, dec!(50000));

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(source.calls(), 2);
        let stats = provider.stats();
        assert!(stats.last_failure.unwrap().contains("connection reset"));

        // Past validity the failure surfaces.
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        let err = provider.get_quotes().await.unwrap_err();
        assert!(matches!(err, FeedError::StaleExceeded { .. }));
    }

    #[tokio::test]
    async fn test_cold_failure_reports_source_error() {
        let source = Arc::new(MockQuoteSource::new());
        source.fail_with("boom");
        let provider = provider_with(source.clone());

        let err = provider.get_quotes().await.unwrap_err();
        assert!(matches!(err, FeedError::SourceFailed(_)));
        assert!(err.to_string().contains("boom"));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_recovery_after_failures() {
        let source = Arc::new(MockQuoteSource::new());
        source.fail_with("down");
        let provider = provider_with(source.clone());

        assert!(provider.get_quotes().await.is_err());

        source.succeed();
        source.set_quote(PairQuote::new(pair("BTC", "USD"), dec!(42000), dec!(42010)));

        let snapshot = provider.get_quotes().await.unwrap();
        assert_eq!(snapshot.quotes[0].bid_ask.bid, dec!(42000));
        assert!(provider.stats().last_failure.is_none());
    }
}
