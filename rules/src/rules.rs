//! Rule collections: lookup by pair and primary/fallback grouping.

use std::fmt;
use std::str::FromStr;

use ratemesh_common::CurrencyPair;

use crate::ast::{Expr, PairPattern};
use crate::error::ParseError;
use crate::instance::RuleInstance;
use crate::parser;

/// A single parsed rate rule: a head pattern and its formula.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRule {
    pattern: PairPattern,
    expr: Expr,
}

impl RateRule {
    pub fn new(pattern: PairPattern, expr: Expr) -> Self {
        Self { pattern, expr }
    }

    pub fn pattern(&self) -> &PairPattern {
        &self.pattern
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Whether this rule's head pattern applies to the given pair.
    pub fn matches(&self, pair: &CurrencyPair) -> bool {
        self.pattern.matches(pair)
    }
}

impl fmt::Display for RateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.pattern, self.expr)
    }
}

/// An ordered collection of rate rules, as written in one rule script.
///
/// Parsed once at registration; binding and evaluation never re-parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateRules {
    rules: Vec<RateRule>,
}

impl RateRules {
    /// Parse a rule script such as
    /// `BTG_X = BTG_BTC * BTC_X; BTG_BTC = bitfinex(BTG_BTC)`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Ok(Self {
            rules: parser::parse_rules(text)?,
        })
    }

    pub fn from_rules(rules: Vec<RateRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateRule> {
        self.rules.iter()
    }

    /// The rule that applies to `pair`, if any.
    ///
    /// The most specific matching pattern wins (exact beats `BASE_X`
    /// beats `X_QUOTE` beats `X_X`); among equally specific patterns the
    /// last definition in the script wins, so later lines override
    /// earlier ones.
    pub fn rule_for(&self, pair: &CurrencyPair) -> Option<&RateRule> {
        let mut best: Option<&RateRule> = None;
        for rule in &self.rules {
            if !rule.matches(pair) {
                continue;
            }
            let replace = match best {
                None => true,
                Some(current) => {
                    rule.pattern().specificity() >= current.pattern().specificity()
                }
            };
            if replace {
                best = Some(rule);
            }
        }
        best
    }

    /// Bind `pair` against this collection, resolving pair references
    /// recursively through the same collection.
    pub fn bind(&self, pair: &CurrencyPair) -> RuleInstance {
        RuleInstance::bind(self, pair)
    }
}

impl FromStr for RateRules {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RateRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for rule in &self.rules {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", rule)?;
            first = false;
        }
        Ok(())
    }
}

/// Primary rules plus an optional fallback collection tried per pair
/// when the primary evaluation yields no result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub primary: RateRules,
    pub fallback: Option<RateRules>,
}

impl RuleSet {
    pub fn new(primary: RateRules) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: RateRules) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Parse primary and optional fallback scripts in one step.
    pub fn parse(primary: &str, fallback: Option<&str>) -> Result<Self, ParseError> {
        Ok(Self {
            primary: RateRules::parse(primary)?,
            fallback: fallback.map(RateRules::parse).transpose()?,
        })
    }
}
