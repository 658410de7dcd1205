//! Bound rule instances: dependency collection, quote supply, and
//! evaluation.
//!
//! Binding resolves a rule's pair references recursively through the
//! same rule collection, producing a tree whose leaves are literals and
//! exchange quote keys. The orchestrator supplies resolved quotes, then
//! [`RuleInstance::evaluate`] folds the tree into a bid/ask result or an
//! error set. Instances live for one fetch round.

use std::collections::{BTreeSet, HashMap};

use ratemesh_common::{BidAsk, CurrencyPair, ExchangeName, Quote, QuoteKey};
use rust_decimal::Decimal;
use tracing::debug;

use crate::ast::{Expr, Op};
use crate::error::RuleError;
use crate::rules::RateRules;

/// A bound expression node. Pair references become child nodes at bind
/// time; exchange calls become quote keys.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Decimal),
    Quote(QuoteKey),
    Child { pair: CurrencyPair, body: Box<Node> },
    Unresolved(CurrencyPair),
    Binary { op: Op, lhs: Box<Node>, rhs: Box<Node> },
}

/// Output of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The computed rate, absent when any input was missing or invalid.
    pub bid_ask: Option<BidAsk>,
    /// Every binding and evaluation error, deterministically ordered.
    pub errors: BTreeSet<RuleError>,
    /// The bound formula with resolved leaves shown as `(bid, ask)`.
    pub evaluated_text: String,
}

/// One rule bound to one concrete requested pair for one fetch round.
#[derive(Debug, Clone)]
pub struct RuleInstance {
    pair: CurrencyPair,
    node: Node,
    binding_errors: BTreeSet<RuleError>,
    dependencies: BTreeSet<QuoteKey>,
    quotes: HashMap<QuoteKey, BidAsk>,
}

impl RuleInstance {
    /// Bind `pair` against `rules`. Binding failures (no rule, circular
    /// reference) are recorded rather than raised; the instance then
    /// evaluates to those errors.
    pub(crate) fn bind(rules: &RateRules, pair: &CurrencyPair) -> Self {
        let mut errors = BTreeSet::new();
        let mut stack = Vec::new();
        let node = bind_pair(rules, pair, &mut stack, &mut errors);

        let mut dependencies = BTreeSet::new();
        collect_quote_keys(&node, &mut dependencies);

        debug!(
            pair = %pair,
            dependencies = dependencies.len(),
            binding_errors = errors.len(),
            "Bound rule instance"
        );

        Self {
            pair: pair.clone(),
            node,
            binding_errors: errors,
            dependencies,
            quotes: HashMap::new(),
        }
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    /// Every `exchange(pair)` quote this instance needs, transitively.
    pub fn dependencies(&self) -> &BTreeSet<QuoteKey> {
        &self.dependencies
    }

    /// Distinct exchanges among the dependencies.
    pub fn dependency_exchanges(&self) -> BTreeSet<ExchangeName> {
        self.dependencies
            .iter()
            .map(|key| key.exchange.clone())
            .collect()
    }

    pub fn has_binding_errors(&self) -> bool {
        !self.binding_errors.is_empty()
    }

    /// Store one resolved quote. Quotes for keys this instance does not
    /// depend on are ignored.
    pub fn supply_quote(&mut self, quote: &Quote) {
        let key = quote.key();
        if self.dependencies.contains(&key) {
            self.quotes.insert(key, quote.bid_ask);
        }
    }

    /// Store every relevant quote from a fetch round.
    pub fn supply_quotes<'a>(&mut self, quotes: impl IntoIterator<Item = &'a Quote>) {
        for quote in quotes {
            self.supply_quote(quote);
        }
    }

    /// The bound formula with wildcards substituted, without values.
    /// Empty when the requested pair matched no rule.
    pub fn text(&self) -> String {
        match &self.node {
            Node::Unresolved(_) => String::new(),
            node => render_text(node),
        }
    }

    /// Evaluate the bound formula over the supplied quotes.
    ///
    /// Bid and ask are computed independently through the same operator
    /// sequence; literals fold into both channels. Any unresolved
    /// dependency fails the whole rule. Pure: repeated calls with the
    /// same supplied quotes produce identical output.
    pub fn evaluate(&self) -> Evaluation {
        let mut errors = self.binding_errors.clone();
        let bid_ask = self.eval_node(&self.node, &mut errors);
        let evaluated_text = match &self.node {
            Node::Unresolved(_) => String::new(),
            node => self.render_evaluated(node),
        };

        Evaluation {
            bid_ask,
            errors,
            evaluated_text,
        }
    }

    fn eval_node(&self, node: &Node, errors: &mut BTreeSet<RuleError>) -> Option<BidAsk> {
        match node {
            Node::Literal(value) => Some(BidAsk::new(*value, *value)),
            Node::Quote(key) => match self.quotes.get(key) {
                Some(bid_ask) => Some(*bid_ask),
                None => {
                    errors.insert(RuleError::QuoteUnresolved(key.clone()));
                    None
                }
            },
            Node::Child { body, .. } => self.eval_node(body, errors),
            Node::Unresolved(_) => None,
            Node::Binary { op, lhs, rhs } => {
                let lhs = self.eval_node(lhs, errors);
                let rhs = self.eval_node(rhs, errors);
                let (lhs, rhs) = match (lhs, rhs) {
                    (Some(lhs), Some(rhs)) => (lhs, rhs),
                    _ => return None,
                };
                match op {
                    Op::Mul => Some(BidAsk::new(lhs.bid * rhs.bid, lhs.ask * rhs.ask)),
                    Op::Div => match (
                        lhs.bid.checked_div(rhs.bid),
                        lhs.ask.checked_div(rhs.ask),
                    ) {
                        (Some(bid), Some(ask)) => Some(BidAsk::new(bid, ask)),
                        _ => {
                            errors.insert(RuleError::DivisionByZero);
                            None
                        }
                    },
                }
            }
        }
    }

    fn render_evaluated(&self, node: &Node) -> String {
        match node {
            Node::Literal(value) => value.to_string(),
            Node::Quote(key) => match self.quotes.get(key) {
                Some(bid_ask) => bid_ask.to_string(),
                None => key.to_string(),
            },
            Node::Child { pair, body } => {
                let mut scratch = BTreeSet::new();
                match self.eval_node(body, &mut scratch) {
                    Some(bid_ask) => bid_ask.to_string(),
                    None => pair.to_string(),
                }
            }
            Node::Unresolved(pair) => pair.to_string(),
            Node::Binary { op, lhs, rhs } => format!(
                "{} {} {}",
                self.render_evaluated(lhs),
                op,
                self.render_evaluated(rhs)
            ),
        }
    }
}

fn bind_pair(
    rules: &RateRules,
    pair: &CurrencyPair,
    stack: &mut Vec<CurrencyPair>,
    errors: &mut BTreeSet<RuleError>,
) -> Node {
    if stack.contains(pair) {
        errors.insert(RuleError::CircularReference(pair.clone()));
        return Node::Unresolved(pair.clone());
    }

    match rules.rule_for(pair) {
        Some(rule) => {
            stack.push(pair.clone());
            let node = bind_expr(rules, rule.expr(), pair, stack, errors);
            stack.pop();
            node
        }
        None => {
            errors.insert(RuleError::NoRuleForPair(pair.clone()));
            Node::Unresolved(pair.clone())
        }
    }
}

fn bind_expr(
    rules: &RateRules,
    expr: &Expr,
    context: &CurrencyPair,
    stack: &mut Vec<CurrencyPair>,
    errors: &mut BTreeSet<RuleError>,
) -> Node {
    match expr {
        Expr::Literal(value) => Node::Literal(*value),
        Expr::PairRef(pattern) => {
            // Wildcards resolve against the pair being bound at this
            // level, so nested references re-anchor to their own pair.
            let referenced = pattern.substitute(context);
            let body = bind_pair(rules, &referenced, stack, errors);
            Node::Child {
                pair: referenced,
                body: Box::new(body),
            }
        }
        Expr::ExchangeCall { exchange, pair } => Node::Quote(QuoteKey::new(
            exchange.clone(),
            pair.substitute(context),
        )),
        Expr::Binary { op, lhs, rhs } => Node::Binary {
            op: *op,
            lhs: Box::new(bind_expr(rules, lhs, context, stack, errors)),
            rhs: Box::new(bind_expr(rules, rhs, context, stack, errors)),
        },
    }
}

fn collect_quote_keys(node: &Node, keys: &mut BTreeSet<QuoteKey>) {
    match node {
        Node::Quote(key) => {
            keys.insert(key.clone());
        }
        Node::Child { body, .. } => collect_quote_keys(body, keys),
        Node::Binary { lhs, rhs, .. } => {
            collect_quote_keys(lhs, keys);
            collect_quote_keys(rhs, keys);
        }
        Node::Literal(_) | Node::Unresolved(_) => {}
    }
}

fn render_text(node: &Node) -> String {
    match node {
        Node::Literal(value) => value.to_string(),
        Node::Quote(key) => key.to_string(),
        Node::Child { pair, .. } => pair.to_string(),
        Node::Unresolved(pair) => pair.to_string(),
        Node::Binary { op, lhs, rhs } => {
            format!("{} {} {}", render_text(lhs), op, render_text(rhs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratemesh_common::pair;
    use rust_decimal_macros::dec;

    fn quote(exchange: &str, base: &str, quote_code: &str, bid: Decimal, ask: Decimal) -> Quote {
        Quote::new(
            ExchangeName::new(exchange),
            pair(base, quote_code),
            BidAsk::new(bid, ask),
        )
    }

    fn worked_example_rules() -> RateRules {
        RateRules::parse(
            "BTG_X = BTG_BTC * BTC_X; BTG_BTC = bitfinex(BTG_BTC); BTC_X = coindesk(BTC_X)",
        )
        .unwrap()
    }

    #[test]
    fn test_bind_collects_transitive_dependencies() {
        let instance = worked_example_rules().bind(&pair("BTG", "USD"));

        let deps: Vec<String> = instance
            .dependencies()
            .iter()
            .map(|key| key.to_string())
            .collect();
        assert_eq!(deps, vec!["bitfinex(BTG_BTC)", "coindesk(BTC_USD)"]);
        assert!(!instance.has_binding_errors());
    }

    #[test]
    fn test_text_shows_bound_formula() {
        let instance = worked_example_rules().bind(&pair("BTG", "USD"));

        assert_eq!(instance.text(), "BTG_BTC * BTC_USD");
    }

    #[test]
    fn test_worked_example_evaluation() {
        let mut instance = worked_example_rules().bind(&pair("BTG", "USD"));
        instance.supply_quote(&quote("bitfinex", "BTG", "BTC", dec!(0.01), dec!(0.0102)));
        instance.supply_quote(&quote("coindesk", "BTC", "USD", dec!(50000), dec!(50010)));

        let evaluation = instance.evaluate();

        assert_eq!(
            evaluation.bid_ask,
            Some(BidAsk::new(dec!(500), dec!(510.102)))
        );
        assert!(evaluation.errors.is_empty());
        assert_eq!(evaluation.evaluated_text, "(0.01, 0.0102) * (50000, 50010)");
    }

    #[test]
    fn test_missing_quote_fails_whole_rule() {
        let rules = RateRules::parse("BTG_X = bitfinex(BTG_BTC) * kraken(BTC_X)").unwrap();
        let mut instance = rules.bind(&pair("BTG", "USD"));
        instance.supply_quote(&quote("bitfinex", "BTG", "BTC", dec!(0.01), dec!(0.0102)));

        let evaluation = instance.evaluate();

        // One resolved term must not produce a partial result.
        assert_eq!(evaluation.bid_ask, None);
        assert_eq!(
            evaluation.errors,
            BTreeSet::from([RuleError::QuoteUnresolved(QuoteKey::new(
                ExchangeName::new("kraken"),
                pair("BTC", "USD"),
            ))])
        );
    }

    #[test]
    fn test_no_rule_for_pair_yields_empty_text() {
        let rules = RateRules::parse("BTC_USD = kraken(BTC_USD)").unwrap();
        let instance = rules.bind(&pair("DOGE", "EUR"));

        assert!(instance.has_binding_errors());
        assert_eq!(instance.text(), "");

        let evaluation = instance.evaluate();
        assert_eq!(evaluation.bid_ask, None);
        assert!(evaluation
            .errors
            .contains(&RuleError::NoRuleForPair(pair("DOGE", "EUR"))));
        assert_eq!(evaluation.evaluated_text, "");
    }

    #[test]
    fn test_unresolved_reference_inside_formula() {
        let rules = RateRules::parse("BTG_X = BTG_BTC * BTC_X; BTG_BTC = bitfinex(BTG_BTC)")
            .unwrap();
        let instance = rules.bind(&pair("BTG", "USD"));

        assert!(instance.has_binding_errors());
        assert_eq!(instance.text(), "BTG_BTC * BTC_USD");

        let evaluation = instance.evaluate();
        assert!(evaluation
            .errors
            .contains(&RuleError::NoRuleForPair(pair("BTC", "USD"))));
    }

    #[test]
    fn test_circular_reference_detected() {
        let rules = RateRules::parse("FOO_X = BAR_X; BAR_X = FOO_X").unwrap();
        let instance = rules.bind(&pair("FOO", "USD"));

        let evaluation = instance.evaluate();

        assert_eq!(evaluation.bid_ask, None);
        assert!(evaluation
            .errors
            .contains(&RuleError::CircularReference(pair("FOO", "USD"))));
    }

    #[test]
    fn test_self_reference_through_exchange_call_is_not_a_cycle() {
        let rules = RateRules::parse("BTG_BTC = bitfinex(BTG_BTC)").unwrap();
        let instance = rules.bind(&pair("BTG", "BTC"));

        assert!(!instance.has_binding_errors());
        assert_eq!(instance.text(), "bitfinex(BTG_BTC)");
    }

    #[test]
    fn test_division_by_zero() {
        let rules = RateRules::parse("BTC_USD = kraken(BTC_USD) / 0").unwrap();
        let mut instance = rules.bind(&pair("BTC", "USD"));
        instance.supply_quote(&quote("kraken", "BTC", "USD", dec!(50000), dec!(50010)));

        let evaluation = instance.evaluate();

        assert_eq!(evaluation.bid_ask, None);
        assert!(evaluation.errors.contains(&RuleError::DivisionByZero));
    }

    #[test]
    fn test_literals_fold_into_both_channels() {
        let rules = RateRules::parse("BTC_USD = kraken(BTC_USD) * 0.995").unwrap();
        let mut instance = rules.bind(&pair("BTC", "USD"));
        instance.supply_quote(&quote("kraken", "BTC", "USD", dec!(50000), dec!(50010)));

        let evaluation = instance.evaluate();

        assert_eq!(
            evaluation.bid_ask,
            Some(BidAsk::new(dec!(49750), dec!(49759.95)))
        );
    }

    #[test]
    fn test_inverted_rate_via_division() {
        let rules = RateRules::parse("USD_BTC = 1 / kraken(BTC_USD)").unwrap();
        let mut instance = rules.bind(&pair("USD", "BTC"));
        instance.supply_quote(&quote("kraken", "BTC", "USD", dec!(50000), dec!(40000)));

        let evaluation = instance.evaluate();

        assert_eq!(
            evaluation.bid_ask,
            Some(BidAsk::new(dec!(0.00002), dec!(0.000025)))
        );
    }

    #[test]
    fn test_quotes_for_other_keys_are_ignored() {
        let rules = RateRules::parse("BTC_USD = kraken(BTC_USD)").unwrap();
        let mut instance = rules.bind(&pair("BTC", "USD"));
        instance.supply_quote(&quote("bitfinex", "BTC", "USD", dec!(1), dec!(2)));

        let evaluation = instance.evaluate();

        assert_eq!(evaluation.bid_ask, None);
        assert!(!evaluation.errors.is_empty());
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let mut instance = worked_example_rules().bind(&pair("BTG", "USD"));
        instance.supply_quote(&quote("bitfinex", "BTG", "BTC", dec!(0.01), dec!(0.0102)));
        instance.supply_quote(&quote("coindesk", "BTC", "USD", dec!(50000), dec!(50010)));

        let first = instance.evaluate();
        let second = instance.evaluate();

        assert_eq!(first, second);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_price() -> impl Strategy<Value = Decimal> {
            // Positive prices across the magnitudes quotes show up in.
            (1i64..10_000_000, 0u32..6).prop_map(|(mantissa, scale)| {
                Decimal::new(mantissa, scale)
            })
        }

        proptest! {
            #[test]
            fn prop_repeated_evaluation_is_identical(
                bid in arb_price(),
                ask in arb_price(),
                factor in arb_price(),
            ) {
                let rules = RateRules::parse("BTC_USD = kraken(BTC_USD) * 1")
                    .unwrap();
                let mut instance = rules.bind(&pair("BTC", "USD"));
                instance.supply_quote(&Quote::new(
                    ExchangeName::new("kraken"),
                    pair("BTC", "USD"),
                    BidAsk::new(bid * factor, ask * factor),
                ));

                let first = instance.evaluate();
                let second = instance.evaluate();
                prop_assert_eq!(first, second);
            }

            #[test]
            fn prop_channels_evaluate_independently(
                bid in arb_price(),
                ask in arb_price(),
                factor in arb_price(),
            ) {
                let script = format!("BTC_USD = kraken(BTC_USD) * {}", factor);
                let rules = RateRules::parse(&script).unwrap();
                let mut instance = rules.bind(&pair("BTC", "USD"));
                instance.supply_quote(&Quote::new(
                    ExchangeName::new("kraken"),
                    pair("BTC", "USD"),
                    BidAsk::new(bid, ask),
                ));

                let evaluation = instance.evaluate();
                let result = evaluation.bid_ask.unwrap();
                prop_assert_eq!(result.bid, bid * factor);
                prop_assert_eq!(result.ask, ask * factor);
            }
        }
    }
}
