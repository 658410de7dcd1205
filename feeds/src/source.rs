//! Quote source trait and test mock.

use async_trait::async_trait;
use ratemesh_common::PairQuote;

use crate::error::FeedResult;

/// One exchange's raw quote feed.
///
/// Implementations must not retry internally and must apply their own
/// timeout; the caching layer imposes none. Concurrent calls must be
/// safe. Cancellation is dropping the returned future.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch every pair the exchange currently publishes.
    async fn fetch_quotes(&self) -> FeedResult<Vec<PairQuote>>;
}

/// Mock quote source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockQuoteSource {
    quotes: dashmap::DashMap<String, PairQuote>,
    scripted_failure: parking_lot::Mutex<Option<String>>,
    delay: parking_lot::Mutex<std::time::Duration>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockQuoteSource {
    /// Create a mock with no quotes.
    pub fn new() -> Self {
        Self {
            quotes: dashmap::DashMap::new(),
            scripted_failure: parking_lot::Mutex::new(None),
            delay: parking_lot::Mutex::new(std::time::Duration::ZERO),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Set or replace the quote for one pair.
    pub fn set_quote(&self, quote: PairQuote) {
        self.quotes.insert(quote.pair.to_string(), quote);
    }

    /// Make every subsequent fetch fail with the given message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.scripted_failure.lock() = Some(message.into());
    }

    /// Clear a scripted failure.
    pub fn succeed(&self) {
        *self.scripted_failure.lock() = None;
    }

    /// Inject latency into every fetch.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock() = delay;
    }

    /// How many times `fetch_quotes` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockQuoteSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl QuoteSource for MockQuoteSource {
    async fn fetch_quotes(&self) -> FeedResult<Vec<PairQuote>> {
        use crate::error::FeedError;

        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.scripted_failure.lock().clone();
        if let Some(message) = failure {
            return Err(FeedError::SourceFailed(message));
        }

        Ok(self
            .quotes
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
