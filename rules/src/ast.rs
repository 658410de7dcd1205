//! Rule grammar AST: pair patterns and arithmetic expressions.
//!
//! Rules are parsed once at registration into this representation and
//! never re-parsed per fetch. A pattern component spelled `X` (any case)
//! is a wildcard that is substituted positionally from the requested
//! pair at bind time.

use std::fmt;

use ratemesh_common::{Currency, CurrencyPair, ExchangeName};
use rust_decimal::Decimal;

/// One component of a pair pattern: a concrete currency code or the
/// wildcard `X`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PairSlot {
    Code(Currency),
    Wildcard,
}

impl PairSlot {
    /// Parse a pattern component. A lone `X` (any case) is the wildcard.
    pub fn parse(component: &str) -> Self {
        if component.eq_ignore_ascii_case("X") {
            PairSlot::Wildcard
        } else {
            PairSlot::Code(Currency::new(component))
        }
    }

    /// Whether this slot accepts the given currency.
    pub fn matches(&self, currency: &Currency) -> bool {
        match self {
            PairSlot::Code(code) => code == currency,
            PairSlot::Wildcard => true,
        }
    }

    fn resolve(&self, requested: &Currency) -> Currency {
        match self {
            PairSlot::Code(code) => code.clone(),
            PairSlot::Wildcard => requested.clone(),
        }
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, PairSlot::Wildcard)
    }
}

impl fmt::Display for PairSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairSlot::Code(code) => write!(f, "{}", code),
            PairSlot::Wildcard => write!(f, "X"),
        }
    }
}

/// A pair pattern such as `BTG_USD`, `BTG_X`, or `X_X`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairPattern {
    pub base: PairSlot,
    pub quote: PairSlot,
}

impl PairPattern {
    pub fn new(base: PairSlot, quote: PairSlot) -> Self {
        Self { base, quote }
    }

    /// A fully concrete pattern for the given pair.
    pub fn exact(pair: &CurrencyPair) -> Self {
        Self {
            base: PairSlot::Code(pair.base.clone()),
            quote: PairSlot::Code(pair.quote.clone()),
        }
    }

    /// Whether this pattern applies to the given concrete pair.
    pub fn matches(&self, pair: &CurrencyPair) -> bool {
        self.base.matches(&pair.base) && self.quote.matches(&pair.quote)
    }

    /// Pattern precedence when several patterns match one pair.
    ///
    /// Exact patterns (3) beat a concrete base with wildcard quote (2),
    /// which beats a wildcard base with concrete quote (1), which beats
    /// the catch-all `X_X` (0).
    pub fn specificity(&self) -> u8 {
        match (&self.base, &self.quote) {
            (PairSlot::Code(_), PairSlot::Code(_)) => 3,
            (PairSlot::Code(_), PairSlot::Wildcard) => 2,
            (PairSlot::Wildcard, PairSlot::Code(_)) => 1,
            (PairSlot::Wildcard, PairSlot::Wildcard) => 0,
        }
    }

    /// Fill wildcards positionally from the requested pair: a wildcard
    /// base takes the requested base, a wildcard quote the requested
    /// quote.
    pub fn substitute(&self, requested: &CurrencyPair) -> CurrencyPair {
        CurrencyPair::new(
            self.base.resolve(&requested.base),
            self.quote.resolve(&requested.quote),
        )
    }

    /// The concrete pair, if the pattern has no wildcards.
    pub fn as_concrete(&self) -> Option<CurrencyPair> {
        match (&self.base, &self.quote) {
            (PairSlot::Code(base), PairSlot::Code(quote)) => {
                Some(CurrencyPair::new(base.clone(), quote.clone()))
            }
            _ => None,
        }
    }

    pub fn has_wildcard(&self) -> bool {
        self.base.is_wildcard() || self.quote.is_wildcard()
    }
}

impl fmt::Display for PairPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}

/// Multiplicative operators of the rule grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Mul,
    Div,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Mul => write!(f, "*"),
            Op::Div => write!(f, "/"),
        }
    }
}

/// A rule body: a left-associative chain of terms over `*` and `/`.
///
/// Terms are literal numbers, references to another pair's rule, or
/// `exchange(PAIR)` calls pulling one resolved quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Decimal),
    PairRef(PairPattern),
    ExchangeCall {
        exchange: ExchangeName,
        pair: PairPattern,
    },
    Binary {
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Fill every wildcard in the expression positionally from the
    /// requested pair.
    pub fn substitute(&self, requested: &CurrencyPair) -> Expr {
        match self {
            Expr::Literal(value) => Expr::Literal(*value),
            Expr::PairRef(pattern) => Expr::PairRef(PairPattern::exact(&pattern.substitute(requested))),
            Expr::ExchangeCall { exchange, pair } => Expr::ExchangeCall {
                exchange: exchange.clone(),
                pair: PairPattern::exact(&pair.substitute(requested)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.substitute(requested)),
                rhs: Box::new(rhs.substitute(requested)),
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::PairRef(pattern) => write!(f, "{}", pattern),
            Expr::ExchangeCall { exchange, pair } => write!(f, "{}({})", exchange, pair),
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
        }
    }
}
