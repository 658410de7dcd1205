//! Externally visible outcome of one rate fetch.

use std::time::Duration as StdDuration;

use ratemesh_common::{BidAsk, ExchangeError};
use serde::{Serialize, Serializer};

/// Outcome of resolving a single currency pair.
///
/// Always produced, even when every dependency failed. Consumers check
/// `bid_ask` first and fall back to `errors` for diagnostics; exchange
/// failures observed while collecting quotes are reported separately so a
/// dead exchange can be told apart from a rule that does not cover the pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateResult {
    /// The bound formula that produced the outcome.
    pub rule: String,
    /// The formula with resolved quotes substituted inline.
    pub evaluated_rule: String,
    /// Resolved price, `None` when evaluation failed.
    pub bid_ask: Option<BidAsk>,
    /// Evaluation errors, rendered as messages.
    pub errors: Vec<String>,
    /// Exchange failures encountered while collecting quotes, at most one
    /// per exchange.
    pub exchange_errors: Vec<ExchangeError>,
    /// Wall-clock time spent waiting on exchange queries.
    #[serde(rename = "latencyMs", serialize_with = "duration_millis")]
    pub latency: StdDuration,
}

impl RateResult {
    /// Whether evaluation produced a usable price.
    pub fn is_resolved(&self) -> bool {
        self.bid_ask.is_some()
    }

    /// Placeholder for a pipeline that could not run at all.
    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self {
            rule: String::new(),
            evaluated_rule: String::new(),
            bid_ask: None,
            errors: vec![message.into()],
            exchange_errors: Vec::new(),
            latency: StdDuration::ZERO,
        }
    }
}

fn duration_millis<S>(latency: &StdDuration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(latency.as_millis() as u64)
}
