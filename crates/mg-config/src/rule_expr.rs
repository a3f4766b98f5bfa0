//! Rule and middleware expression parsing.
//!
//! Route definitions carry rules as strings:
//!
//! ```text
//! Host(`example.com`) && PathPrefix(`/api`)
//! HostSNI(`mc.example`) || HostMinecraft(`mc.local`, `mc2.local`)
//! ```
//!
//! Grammar: `||` binds loosest, then `&&`, then `!`; predicates are
//! function calls over backtick, single or double quoted string arguments;
//! parentheses group.

use std::sync::Arc;

use mg_core::http::{
    Chain, Logging, Middleware, RequireSecure, SetForwardingHeaders, StripPrefix,
};
use mg_core::rule::{self, Rule};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected character {0:?} in expression")]
    UnexpectedChar(char),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown predicate {0:?}")]
    UnknownPredicate(String),

    #[error("unknown middleware {0:?}")]
    UnknownMiddleware(String),

    #[error("predicate {0} expects {1}")]
    BadArity(String, &'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    AndAnd,
    OrOr,
    Bang,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Bang);
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(ParseError::UnexpectedChar('&'));
                }
                tokens.push(Token::AndAnd);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(ParseError::UnexpectedChar('|'));
                }
                tokens.push(Token::OrOr);
            }
            quote @ ('`' | '\'' | '"') => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return Err(ParseError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ParseError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(ParseError::UnexpectedToken(format!("{t:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Rule, ParseError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("one term")
        } else {
            rule::or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Rule, ParseError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("one term")
        } else {
            rule::and(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Rule, ParseError> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            return Ok(rule::not(self.parse_unary()?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Rule, ParseError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let args = self.parse_args()?;
                predicate(&name, args)
            }
            Some(t) => Err(ParseError::UnexpectedToken(format!("{t:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    /// Argument list; the parentheses are optional for zero-argument
    /// predicates (`Any` and `Any()` both parse).
    fn parse_args(&mut self) -> Result<Vec<String>, ParseError> {
        if self.peek() != Some(&Token::LParen) {
            return Ok(Vec::new());
        }
        self.next();
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            match self.next() {
                Some(Token::Str(s)) => args.push(s),
                Some(t) => return Err(ParseError::UnexpectedToken(format!("{t:?}"))),
                None => return Err(ParseError::UnexpectedEnd),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(t) => return Err(ParseError::UnexpectedToken(format!("{t:?}"))),
                None => return Err(ParseError::UnexpectedEnd),
            }
        }
    }
}

fn one_arg(name: &str, mut args: Vec<String>) -> Result<String, ParseError> {
    if args.len() != 1 {
        return Err(ParseError::BadArity(name.to_string(), "exactly one argument"));
    }
    Ok(args.pop().expect("one argument"))
}

fn at_least_one(name: &str, args: Vec<String>) -> Result<Vec<String>, ParseError> {
    if args.is_empty() {
        return Err(ParseError::BadArity(
            name.to_string(),
            "at least one argument",
        ));
    }
    Ok(args)
}

fn predicate(name: &str, args: Vec<String>) -> Result<Rule, ParseError> {
    match name {
        "Any" => Ok(rule::any()),
        "Host" => Ok(rule::or(
            at_least_one(name, args)?.into_iter().map(rule::host),
        )),
        "Path" => Ok(rule::or(
            at_least_one(name, args)?.into_iter().map(rule::path),
        )),
        "PathPrefix" => Ok(rule::or(
            at_least_one(name, args)?.into_iter().map(rule::path_prefix),
        )),
        "PathRegexp" => Ok(rule::or(
            at_least_one(name, args)?
                .into_iter()
                .map(|p| rule::path_regexp(&p)),
        )),
        "Method" => Ok(rule::or(
            at_least_one(name, args)?.into_iter().map(rule::method),
        )),
        "HostSNI" => Ok(rule::or(
            at_least_one(name, args)?.into_iter().map(rule::host_sni),
        )),
        "HostMinecraft" => Ok(rule::host_minecraft(at_least_one(name, args)?)),
        "PlayerMinecraft" => Ok(rule::player_minecraft(at_least_one(name, args)?)),
        "NotPlayerMinecraft" => Ok(rule::not_player_minecraft(at_least_one(name, args)?)),
        other => Err(ParseError::UnknownPredicate(other.to_string())),
    }
}

/// Compile a rule expression into an engine rule.
pub fn parse_rule(input: &str) -> Result<Rule, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let rule = parser.parse_or()?;
    if let Some(t) = parser.peek() {
        return Err(ParseError::UnexpectedToken(format!("{t:?}")));
    }
    Ok(rule)
}

/// Compile one middleware expression (`StripPrefix(`/p`)`, `Logging(`x `)`,
/// `RequireSecure`, `SetForwardingHeaders`).
pub fn parse_middleware(input: &str) -> Result<Arc<dyn Middleware>, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let name = match parser.next() {
        Some(Token::Ident(name)) => name,
        Some(t) => return Err(ParseError::UnexpectedToken(format!("{t:?}"))),
        None => return Err(ParseError::UnexpectedEnd),
    };
    let args = parser.parse_args()?;
    if let Some(t) = parser.peek() {
        return Err(ParseError::UnexpectedToken(format!("{t:?}")));
    }

    let mw: Arc<dyn Middleware> = match name.as_str() {
        "StripPrefix" => Arc::new(StripPrefix::new(one_arg(&name, args)?)),
        "Logging" => Arc::new(Logging::new(one_arg(&name, args)?)),
        "RequireSecure" => {
            if !args.is_empty() {
                return Err(ParseError::BadArity(name, "no arguments"));
            }
            Arc::new(RequireSecure)
        }
        "SetForwardingHeaders" => {
            if !args.is_empty() {
                return Err(ParseError::BadArity(name, "no arguments"));
            }
            Arc::new(SetForwardingHeaders)
        }
        other => return Err(ParseError::UnknownMiddleware(other.to_string())),
    };
    Ok(mw)
}

/// Compile a list of middleware expressions into one chain, leftmost
/// outermost.
pub fn parse_middlewares(inputs: &[String]) -> Result<Chain, ParseError> {
    let mws = inputs
        .iter()
        .map(|input| parse_middleware(input))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Chain::new(mws))
}
