//! Scope selectors, as used to decide where injections apply.
//!
//! ```text
//! selector    := term ((',' | '|') term)*
//! term        := ('L:' | 'R:')? conjunction
//! conjunction := expression+
//! expression  := '-' expression | '(' disjunction ')' | name+
//! disjunction := conjunction ((',' | '|') conjunction)*
//! ```
//!
//! A run of names is a path: it matches a scope path if each name is a prefix of some
//! scope, in order, without needing to be contiguous.

use std::sync::LazyLock;

use onig::Regex;

use crate::error::{Error, TmResult};
use crate::scope::ScopeName;

/// Where a matching selector asked to be placed relative to the rules it competes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionPrecedence {
    /// `L:` prefix, wins ties against the local rules
    Left,
    /// No prefix
    Default,
    /// `R:` prefix
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expression {
    Path(Vec<ScopeName>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    fn matches(&self, scopes: &[ScopeName]) -> bool {
        match self {
            Expression::Path(names) => {
                let mut next = 0;
                names.iter().all(|name| {
                    match scopes[next..].iter().position(|s| name.is_prefix_of(s)) {
                        Some(offset) => {
                            next += offset + 1;
                            true
                        }
                        None => false,
                    }
                })
            }
            Expression::And(exprs) => exprs.iter().all(|e| e.matches(scopes)),
            Expression::Or(exprs) => exprs.iter().any(|e| e.matches(scopes)),
            Expression::Not(expr) => !expr.matches(scopes),
        }
    }
}

/// A parsed scope selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSelector {
    source: String,
    terms: Vec<(InjectionPrecedence, Expression)>,
}

impl ScopeSelector {
    pub fn parse(selector: &str) -> TmResult<Self> {
        let terms = Parser::new(selector)?.parse()?;
        Ok(Self {
            source: selector.to_owned(),
            terms,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the precedence of the first term matching `scopes`, if any does.
    pub fn match_scopes(&self, scopes: &[ScopeName]) -> Option<InjectionPrecedence> {
        self.terms
            .iter()
            .find(|(_, expr)| expr.matches(scopes))
            .map(|(precedence, _)| *precedence)
    }

    pub fn matches(&self, scopes: &[ScopeName]) -> bool {
        self.match_scopes(scopes).is_some()
    }
}

/// Regex for tokenizing selectors
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[LR]:|[\w.][\w.\-]*|[,|\-()]").expect("Invalid selector regex")
});

struct Parser<'a> {
    selector: &'a str,
    /// Tokens with their byte offset in the selector
    tokens: Vec<(usize, &'a str)>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(selector: &'a str) -> TmResult<Self> {
        let mut tokens = Vec::new();
        let mut last_end = 0;

        for (start, end) in TOKEN_REGEX.find_iter(selector) {
            if let Some(offset) = first_non_whitespace(&selector[last_end..start]) {
                return Err(syntax_error(selector, last_end + offset, "unexpected character"));
            }
            tokens.push((start, &selector[start..end]));
            last_end = end;
        }
        if let Some(offset) = first_non_whitespace(&selector[last_end..]) {
            return Err(syntax_error(selector, last_end + offset, "unexpected character"));
        }

        Ok(Self {
            selector,
            tokens,
            position: 0,
        })
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.position).map(|(_, token)| *token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.selector.len())
    }

    fn error(&self, message: &str) -> Error {
        syntax_error(self.selector, self.offset(), message)
    }

    fn parse(mut self) -> TmResult<Vec<(InjectionPrecedence, Expression)>> {
        let mut terms = Vec::new();

        while self.peek().is_some() {
            let precedence = match self.peek() {
                Some("L:") => InjectionPrecedence::Left,
                Some("R:") => InjectionPrecedence::Right,
                _ => InjectionPrecedence::Default,
            };
            if precedence != InjectionPrecedence::Default {
                self.position += 1;
            }

            let Some(expr) = self.parse_conjunction()? else {
                return Err(self.error("expected a scope name, '-' or '('"));
            };
            terms.push((precedence, expr));

            match self.peek() {
                None => break,
                Some("," | "|") => {
                    self.position += 1;
                    if self.peek().is_none() {
                        return Err(self.error("expected a selector after separator"));
                    }
                }
                Some(_) => return Err(self.error("expected ',' or end of selector")),
            }
        }

        Ok(terms)
    }

    fn parse_conjunction(&mut self) -> TmResult<Option<Expression>> {
        let mut exprs = Vec::new();
        while let Some(expr) = self.parse_expression()? {
            exprs.push(expr);
        }

        Ok(match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expression::And(exprs)),
        })
    }

    fn parse_disjunction(&mut self) -> TmResult<Expression> {
        let mut exprs = Vec::new();
        loop {
            let Some(expr) = self.parse_conjunction()? else {
                return Err(self.error("expected a scope name, '-' or '('"));
            };
            exprs.push(expr);
            if matches!(self.peek(), Some("," | "|")) {
                self.position += 1;
            } else {
                break;
            }
        }

        Ok(if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expression::Or(exprs)
        })
    }

    fn parse_expression(&mut self) -> TmResult<Option<Expression>> {
        match self.peek() {
            Some("-") => {
                self.position += 1;
                match self.parse_expression()? {
                    Some(expr) => Ok(Some(Expression::Not(Box::new(expr)))),
                    None => Err(self.error("expected an expression after '-'")),
                }
            }
            Some("(") => {
                self.position += 1;
                let inner = self.parse_disjunction()?;
                if self.peek() != Some(")") {
                    return Err(self.error("expected ')'"));
                }
                self.position += 1;
                Ok(Some(inner))
            }
            Some(token) if is_name(token) => {
                let mut names = Vec::new();
                while let Some(token) = self.peek().filter(|t| is_name(t)) {
                    names.push(ScopeName::new(token));
                    self.position += 1;
                }
                Ok(Some(Expression::Path(names)))
            }
            _ => Ok(None),
        }
    }
}

fn is_name(token: &str) -> bool {
    !matches!(token, "L:" | "R:" | "," | "|" | "-" | "(" | ")")
}

fn first_non_whitespace(s: &str) -> Option<usize> {
    s.char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| i)
}

fn syntax_error(selector: &str, position: usize, message: &str) -> Error {
    Error::ScopeSelectorSyntax {
        selector: selector.to_owned(),
        position,
        message: message.to_owned(),
    }
}
