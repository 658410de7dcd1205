//! Bid/ask quotes and the diagnostic values built from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Currency, CurrencyPair, ExchangeName};

/// A bid/ask price pair.
///
/// The midpoint is derived on demand and never stored. Ask is expected to be
/// at or above bid, but crossed quotes from a feed are carried as-is and left
/// to the caller to judge (`is_crossed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidAsk {
    /// Bid price (what a buyer pays).
    pub bid: Decimal,
    /// Ask price (what a seller asks).
    pub ask: Decimal,
}

impl BidAsk {
    /// Create a new bid/ask pair.
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    /// Mid-market price.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Whether the quote is crossed (ask below bid).
    pub fn is_crossed(&self) -> bool {
        self.ask < self.bid
    }
}

impl fmt::Display for BidAsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.bid, self.ask)
    }
}

/// A quote as a raw feed emits it: pair and prices, no exchange identity.
///
/// Feeds do not know the name they are registered under; the caching
/// provider stamps the name when it captures a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairQuote {
    /// The quoted currency pair.
    pub pair: CurrencyPair,
    /// Quoted prices.
    pub bid_ask: BidAsk,
}

impl PairQuote {
    /// Create a new raw pair quote.
    pub fn new(pair: CurrencyPair, bid: Decimal, ask: Decimal) -> Self {
        Self {
            pair,
            bid_ask: BidAsk::new(bid, ask),
        }
    }
}

/// Key identifying one exchange quote dependency: which exchange, which pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuoteKey {
    /// Exchange the quote must come from.
    pub exchange: ExchangeName,
    /// Pair the quote must cover.
    pub pair: CurrencyPair,
}

impl QuoteKey {
    /// Create a new quote key.
    pub fn new(exchange: ExchangeName, pair: CurrencyPair) -> Self {
        Self { exchange, pair }
    }
}

impl fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.exchange, self.pair)
    }
}

/// A quote stamped with the exchange it came from.
///
/// Produced fresh by a fetch round and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Exchange that published the quote.
    pub exchange: ExchangeName,
    /// The quoted currency pair.
    pub pair: CurrencyPair,
    /// Quoted prices.
    pub bid_ask: BidAsk,
}

impl Quote {
    /// Create a new exchange-stamped quote.
    pub fn new(exchange: ExchangeName, pair: CurrencyPair, bid_ask: BidAsk) -> Self {
        Self {
            exchange,
            pair,
            bid_ask,
        }
    }

    /// Stamp a raw feed quote with its exchange name.
    pub fn from_pair_quote(exchange: ExchangeName, quote: PairQuote) -> Self {
        Self {
            exchange,
            pair: quote.pair,
            bid_ask: quote.bid_ask,
        }
    }

    /// The dependency key this quote satisfies.
    pub fn key(&self) -> QuoteKey {
        QuoteKey::new(self.exchange.clone(), self.pair.clone())
    }
}

/// Diagnostic record of an exchange failure.
///
/// This is a value, not an error type: it is collected into results and
/// never thrown across component boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeError {
    /// Exchange the failure belongs to.
    pub exchange: ExchangeName,
    /// Human-readable failure description.
    pub message: String,
}

impl ExchangeError {
    /// Create a new exchange error record.
    pub fn new(exchange: ExchangeName, message: impl Into<String>) -> Self {
        Self {
            exchange,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exchange, self.message)
    }
}

/// Convenience constructor for tests and simulators.
pub fn pair(base: &str, quote: &str) -> CurrencyPair {
    CurrencyPair::new(Currency::new(base), Currency::new(quote))
}
