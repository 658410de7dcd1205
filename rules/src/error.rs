//! Error types for rule parsing and evaluation.

use ratemesh_common::{CurrencyPair, QuoteKey};
use thiserror::Error;

/// Errors raised while parsing a rule script at registration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A character outside the grammar.
    #[error("Unexpected character `{ch}` at offset {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },

    /// A well-formed token in the wrong position.
    #[error("Unexpected `{found}` at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },

    /// Input ended mid-rule.
    #[error("Unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    /// A numeric literal that does not parse as a decimal.
    #[error("Malformed number `{text}` at offset {offset}")]
    MalformedNumber { text: String, offset: usize },

    /// An identifier that is neither an exchange call nor a valid pair.
    #[error("Malformed pair `{text}` at offset {offset}, expected BASE_QUOTE")]
    MalformedPair { text: String, offset: usize },
}

/// Errors accumulated while binding or evaluating one rule instance.
///
/// These are collected into a set and reported alongside the rate
/// result; they are never raised across component boundaries.
#[derive(Debug, Clone, Error, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleError {
    /// The pair matched no rule in the collection.
    #[error("No rule found for pair {0}")]
    NoRuleForPair(CurrencyPair),

    /// Pair references loop back on themselves.
    #[error("Circular reference while resolving {0}")]
    CircularReference(CurrencyPair),

    /// An exchange call had no resolved quote at evaluation time.
    #[error("Unresolved exchange quote {0}")]
    QuoteUnresolved(QuoteKey),

    /// A divisor channel evaluated to zero.
    #[error("Division by zero")]
    DivisionByZero,
}
