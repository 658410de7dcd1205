//! RateMesh Rate Orchestration
//!
//! Batch resolution of currency pairs: bind rules, query each dependency
//! exchange exactly once per batch, evaluate, and fall back to a secondary
//! rule collection when the primary produces no price.
//!
//! # Features
//!
//! - Per-batch single-flight query pool shared across primary and fallback
//! - Every requested pair yields a [`RateResult`], never an error
//! - Individually awaitable pairs with drop-based cancellation
//! - Atomic counters with a Prometheus text export
//!
//! # Example
//!
//! ```rust,ignore
//! use ratemesh_engine::RateOrchestrator;
//! use ratemesh_rules::RuleSet;
//! use ratemesh_common::pair;
//!
//! let orchestrator = RateOrchestrator::new(registry);
//! let rules = RuleSet::parse("BTC_X = kraken(BTC_X)", None)?;
//!
//! let result = orchestrator.fetch_rate(&pair("BTC", "USD"), &rules).await;
//! if let Some(bid_ask) = result.bid_ask {
//!     println!("BTC_USD = {}", bid_ask);
//! }
//! ```

pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod result;

mod query_pool;

pub use metrics::{EngineMetrics, EngineMetricsSnapshot, SharedEngineMetrics};
pub use orchestrator::{PendingRate, RateBatch, RateOrchestrator};
pub use phase::FetchPhase;
pub use result::RateResult;
