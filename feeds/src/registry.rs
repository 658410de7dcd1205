//! Named collection of caching quote providers.
//!
//! The registry is the failure boundary of the feed layer: every
//! provider error is converted into an `ExchangeError` diagnostic, so
//! callers never need error handling of their own. It is built once at
//! startup and injected where needed.

use std::time::{Duration as StdDuration, Instant};

use dashmap::DashMap;
use ratemesh_common::{ExchangeError, ExchangeName, Quote};
use tracing::{debug, instrument, warn};

use crate::cache::{CachingQuoteProvider, ProviderStats};

/// Outcome of one registry query. Never an error value: a failed
/// exchange carries its diagnostic alongside empty quotes.
#[derive(Debug, Clone)]
pub struct ExchangeFetch {
    pub exchange: ExchangeName,
    pub quotes: Vec<Quote>,
    pub error: Option<ExchangeError>,
    pub latency: StdDuration,
}

impl ExchangeFetch {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Map of exchange name to its caching provider.
#[derive(Default)]
pub struct ExchangeRegistry {
    providers: DashMap<ExchangeName, CachingQuoteProvider>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    /// Register a provider under its exchange name, replacing any
    /// previous registration.
    pub fn register(&self, provider: CachingQuoteProvider) {
        self.providers.insert(provider.exchange().clone(), provider);
    }

    pub fn contains(&self, name: &ExchangeName) -> bool {
        self.providers.contains_key(name)
    }

    pub fn exchange_names(&self) -> Vec<ExchangeName> {
        let mut names: Vec<ExchangeName> =
            self.providers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Query one exchange, measuring wall-clock latency.
    ///
    /// An unknown name yields zero quotes with no error, so a rule
    /// referencing a removed exchange degrades instead of failing.
    #[instrument(skip(self), fields(exchange = %name))]
    pub async fn query(&self, name: &ExchangeName) -> ExchangeFetch {
        let started = Instant::now();

        let provider = match self.providers.get(name) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!("Exchange not registered");
                return ExchangeFetch {
                    exchange: name.clone(),
                    quotes: Vec::new(),
                    error: None,
                    latency: started.elapsed(),
                };
            }
        };

        match provider.get_quotes().await {
            Ok(snapshot) => {
                debug!(quotes = snapshot.quotes.len(), "Exchange query succeeded");
                ExchangeFetch {
                    exchange: name.clone(),
                    quotes: snapshot.quotes.clone(),
                    error: None,
                    latency: started.elapsed(),
                }
            }
            Err(error) => {
                warn!(error = %error, "Exchange query failed");
                ExchangeFetch {
                    exchange: name.clone(),
                    quotes: Vec::new(),
                    error: Some(ExchangeError::new(name.clone(), error.to_string())),
                    latency: started.elapsed(),
                }
            }
        }
    }

    /// Introspection over every registered provider.
    pub fn stats(&self) -> Vec<ProviderStats> {
        let mut stats: Vec<ProviderStats> = self
            .providers
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        stats
    }
}
