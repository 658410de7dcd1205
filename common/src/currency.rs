//! Currency codes, currency pairs, and exchange identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A currency code (fiat or crypto), uppercase-normalized.
///
/// Two codes that differ only in case compare equal because normalization
/// happens at construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from a code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// The normalized code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Codes that show up all over rules and tests.
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn btc() -> Self {
        Self::new("BTC")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Error raised when a string is not a valid `BASE_QUOTE` pair.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid currency pair `{0}`, expected BASE_QUOTE")]
pub struct PairParseError(pub String);

/// A currency pair: `base` priced in `quote`.
///
/// The textual form is `BASE_QUOTE`, the same shape the rule grammar uses.
/// Equality is case-insensitive because both components normalize on
/// construction. No direction beyond "base priced in quote" is implied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency (the one being priced).
    pub base: Currency,
    /// Quote currency (the pricing currency).
    pub quote: Currency,
}

impl CurrencyPair {
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// Parse the `BASE_QUOTE` textual form.
    pub fn parse(s: &str) -> Result<Self, PairParseError> {
        let mut parts = s.split('_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(Currency::new(base), Currency::new(quote)))
            }
            _ => Err(PairParseError(s.to_string())),
        }
    }

    /// The pair with base and quote swapped.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}

/// Name of an exchange feed, lowercase-normalized.
///
/// Exchange names appear in rule text (`bitfinex(BTG_BTC)`) and as registry
/// keys; normalizing here keeps the two lookups consistent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExchangeName(String);

impl ExchangeName {
    /// Create a new exchange name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_case_insensitive() {
        assert_eq!(Currency::new("btc"), Currency::new("BTC"));
        assert_eq!(Currency::new("Usd").code(), "USD");
    }

    #[test]
    fn test_pair_parse() {
        let pair = CurrencyPair::parse("btg_usd").unwrap();
        assert_eq!(pair.base, Currency::new("BTG"));
        assert_eq!(pair.quote, Currency::usd());
        assert_eq!(pair.to_string(), "BTG_USD");
    }

    #[test]
    fn test_pair_parse_rejects_malformed() {
        assert!(CurrencyPair::parse("BTG").is_err());
        assert!(CurrencyPair::parse("BTG_").is_err());
        assert!(CurrencyPair::parse("_USD").is_err());
        assert!(CurrencyPair::parse("A_B_C").is_err());
    }

    #[test]
    fn test_pair_case_insensitive_equality() {
        let a = CurrencyPair::parse("BTG_usd").unwrap();
        let b = CurrencyPair::parse("btg_USD").unwrap();
        assert_eq!(a, b);

        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_pair_inverse() {
        let pair = CurrencyPair::parse("BTC_USD").unwrap();
        let inv = pair.inverse();
        assert_eq!(inv.to_string(), "USD_BTC");
    }

    #[test]
    fn test_exchange_name_normalized() {
        assert_eq!(ExchangeName::new("Bitfinex"), ExchangeName::new("bitfinex"));
        assert_eq!(ExchangeName::new("KRAKEN").as_str(), "kraken");
    }
}
