//! Lexer and recursive-descent parser for the rule grammar.
//!
//! ```text
//! rules         := rule (';' rule)* ';'?
//! rule          := pairTemplate '=' term (('*' | '/') term)*
//! term          := number | pairReference | exchangeCall
//! exchangeCall  := identifier '(' pairReference ')'
//! pairReference := code '_' code
//! ```
//!
//! A pattern component spelled `X` is the wildcard. An identifier is
//! classified by shape: followed by `(` it names an exchange, otherwise
//! it must be a `BASE_QUOTE` pair.

use std::fmt;
use std::str::FromStr;

use ratemesh_common::ExchangeName;
use rust_decimal::Decimal;

use crate::ast::{Expr, Op, PairPattern, PairSlot};
use crate::error::ParseError;
use crate::rules::RateRule;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Decimal),
    Star,
    Slash,
    Equals,
    LParen,
    RParen,
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(text) => write!(f, "{}", text),
            Token::Number(value) => write!(f, "{}", value),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Equals => write!(f, "="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let token = match ch {
            c if c.is_whitespace() => continue,
            '*' => Token::Star,
            '/' => Token::Slash,
            '=' => Token::Equals,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ';' => Token::Semicolon,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        text.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(text)
            }
            c if c.is_ascii_digit() => {
                let mut text = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        text.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match Decimal::from_str(&text) {
                    Ok(value) => Token::Number(value),
                    Err(_) => return Err(ParseError::MalformedNumber { text, offset }),
                }
            }
            c => return Err(ParseError::UnexpectedCharacter { ch: c, offset }),
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn next_token(&mut self) -> Option<(Token, usize)> {
        let spanned = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some((spanned.token.clone(), spanned.offset))
    }

    fn eat_semicolon(&mut self) -> bool {
        if matches!(self.peek_token(), Some(Token::Semicolon)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self) -> Option<Op> {
        let op = match self.peek_token() {
            Some(Token::Star) => Op::Mul,
            Some(Token::Slash) => Op::Div,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn expect(&mut self, expected: &Token, description: &'static str) -> Result<(), ParseError> {
        match self.next_token() {
            Some((token, _)) if token == *expected => Ok(()),
            Some((token, offset)) => Err(ParseError::UnexpectedToken {
                found: token.to_string(),
                expected: description,
                offset,
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: description,
            }),
        }
    }

    fn expect_ident(&mut self, description: &'static str) -> Result<(String, usize), ParseError> {
        match self.next_token() {
            Some((Token::Ident(text), offset)) => Ok((text, offset)),
            Some((token, offset)) => Err(ParseError::UnexpectedToken {
                found: token.to_string(),
                expected: description,
                offset,
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: description,
            }),
        }
    }

    fn parse_rule(&mut self) -> Result<RateRule, ParseError> {
        let pattern = self.parse_pattern()?;
        self.expect(&Token::Equals, "`=`")?;
        let expr = self.parse_expr()?;
        Ok(RateRule::new(pattern, expr))
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        while let Some(op) = self.eat_op() {
            let rhs = self.parse_term()?;
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        match self.next_token() {
            Some((Token::Number(value), _)) => Ok(Expr::Literal(value)),
            Some((Token::Ident(text), offset)) => {
                if matches!(self.peek_token(), Some(Token::LParen)) {
                    self.pos += 1;
                    let pair = self.parse_pattern()?;
                    self.expect(&Token::RParen, "`)`")?;
                    Ok(Expr::ExchangeCall {
                        exchange: ExchangeName::new(text),
                        pair,
                    })
                } else {
                    pattern_from_ident(&text, offset).map(Expr::PairRef)
                }
            }
            Some((token, offset)) => Err(ParseError::UnexpectedToken {
                found: token.to_string(),
                expected: "a rule term",
                offset,
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: "a rule term",
            }),
        }
    }

    fn parse_pattern(&mut self) -> Result<PairPattern, ParseError> {
        let (text, offset) = self.expect_ident("a currency pair")?;
        pattern_from_ident(&text, offset)
    }
}

fn pattern_from_ident(text: &str, offset: usize) -> Result<PairPattern, ParseError> {
    let mut parts = text.split('_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
            Ok(PairPattern::new(PairSlot::parse(base), PairSlot::parse(quote)))
        }
        _ => Err(ParseError::MalformedPair {
            text: text.to_string(),
            offset,
        }),
    }
}

/// Parse a rule script into its rules, in script order.
pub fn parse_rules(src: &str) -> Result<Vec<RateRule>, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
    };

    let mut rules = Vec::new();
    while !parser.at_end() {
        if parser.eat_semicolon() {
            continue;
        }
        rules.push(parser.parse_rule()?);
        if !parser.at_end() {
            parser.expect(&Token::Semicolon, "`;`")?;
        }
    }

    Ok(rules)
}
