//! RateMesh Rate Rules
//!
//! Grammar, parser, and evaluator for user-defined rate rules: small
//! arithmetic formulas that combine exchange quotes into derived
//! bid/ask rates.
//!
//! # Features
//!
//! - Rule scripts parsed once at registration into an expression tree
//! - Wildcard pair patterns (`BTG_X`) with specificity-based lookup
//! - Recursive pair references resolved within one rule collection
//! - Independent bid/ask evaluation with accumulated error sets
//!
//! # Example
//!
//! ```rust,ignore
//! use ratemesh_rules::RateRules;
//! use ratemesh_common::pair;
//!
//! let rules = RateRules::parse("BTG_X = BTG_BTC * BTC_X; BTG_BTC = bitfinex(BTG_BTC)")?;
//! let mut instance = rules.bind(&pair("BTG", "USD"));
//!
//! // The orchestrator supplies quotes for instance.dependencies(),
//! // then evaluation folds them into a rate.
//! let evaluation = instance.evaluate();
//! ```

pub mod ast;
pub mod error;
pub mod instance;
pub mod parser;
pub mod rules;

pub use ast::{Expr, Op, PairPattern, PairSlot};
pub use error::{ParseError, RuleError};
pub use instance::{Evaluation, RuleInstance};
pub use rules::{RateRule, RateRules, RuleSet};
