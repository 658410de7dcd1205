//! RateMesh Quote Feeds
//!
//! The feed layer between external exchange quote sources and the rate
//! engine: staleness-bounded caching per exchange, coalesced refresh,
//! and a registry that turns failures into diagnostics.
//!
//! # Features
//!
//! - `QuoteSource` collaborator trait for per-exchange feed clients
//! - Stale-while-revalidate caching bounded by a validity window
//! - Single-flight refresh shared by concurrent callers
//! - Registry queries with latency capture and error conversion

pub mod cache;
pub mod error;
pub mod registry;
pub mod source;

pub use cache::{CachingQuoteProvider, FeedSettings, ProviderStats, QuoteSnapshot};
pub use error::{FeedError, FeedResult};
pub use registry::{ExchangeFetch, ExchangeRegistry};
pub use source::QuoteSource;

#[cfg(any(test, feature = "test-utils"))]
pub use source::MockQuoteSource;
