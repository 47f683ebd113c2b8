//! Recursive-descent parser for CQL.
//!
//! Filter grammar, `and`/`~` binding tighter than `or`:
//!
//! ```text
//! filter    := or_expr
//! or_expr   := and_expr ( "or" and_expr )*
//! and_expr  := term ( ( "~" | "and" ) term )*
//! term      := "(" or_expr ")" | criterion
//! criterion := path ":" operator ":" values
//! values    := [ literal ] ( "," [ literal ] )*
//! literal   := number | number "-" number | string | url | true | false | null
//! path      := ident ( "." ident )*
//! ```
//!
//! Order grammar: `path ":" ( "asc" | "desc" ) ( "~" path ":" ( "asc" | "desc" ) )*`.
//!
//! Separators without a term between them, trailing separators, empty value
//! slots and empty groups are tolerated and dropped. Input with no criterion
//! at all is an error.

use chrono::{DateTime, NaiveDateTime};
use quarry_core::Value;

use super::lexer::{Spanned, Token, lex};
use crate::error::{QueryError, QueryResult};
use crate::spec::{Direction, OrderKey, OrderSpec};

/// Syntactic filter tree, before operator lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Criterion(RawCriterion),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

/// A criterion exactly as written: slug path segments, operator name and
/// the literal list.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCriterion {
    pub path: Vec<String>,
    pub operator: String,
    pub values: Vec<Literal>,
    /// Byte offset of the criterion in the source.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Value(Value),
    Range(Value, Value),
}

/// Parse filter text into its syntactic tree.
pub fn parse_filter_expr(input: &str) -> QueryResult<FilterExpr> {
    let mut parser = Parser::new(input)?;
    let expr = parser.or_expr()?;
    parser.expect_end()?;
    expr.ok_or_else(|| QueryError::syntax(input, 0, "filter expression has no criteria"))
}

/// Parse order text into an order specification.
pub fn parse_order(input: &str) -> QueryResult<OrderSpec> {
    let mut parser = Parser::new(input)?;
    let mut keys = Vec::new();
    let mut need_separator = false;

    loop {
        match parser.peek() {
            Some(Token::Tilde) => {
                parser.advance();
                need_separator = false;
            }
            Some(Token::Ident) if !need_separator => {
                let path = parser.path()?;
                parser.expect(Token::Colon, "`:` after attribute path")?;
                let span = parser.expect(Token::Ident, "sort direction")?;
                let word = &input[span.clone()];
                let direction = if word.eq_ignore_ascii_case("asc") {
                    Direction::Asc
                } else if word.eq_ignore_ascii_case("desc") {
                    Direction::Desc
                } else {
                    return Err(QueryError::syntax(word, span.start, "expected `asc` or `desc`"));
                };
                keys.push(OrderSpec::Nullary(OrderKey {
                    path: identifier_path(&path),
                    direction,
                }));
                need_separator = true;
            }
            Some(_) => return Err(parser.error_here("expected `~` or an order criterion")),
            None => break,
        }
    }

    if keys.is_empty() {
        return Err(QueryError::syntax(input, 0, "order expression has no criteria"));
    }
    Ok(OrderSpec::all(keys))
}

/// Map slug path segments to attribute names (`first-name` → `first_name`).
pub(crate) fn identifier_path(segments: &[String]) -> String {
    segments
        .iter()
        .map(|s| s.replace('-', "_"))
        .collect::<Vec<_>>()
        .join(".")
}

struct Parser<'src> {
    tokens: Vec<Spanned>,
    pos: usize,
    input: &'src str,
}

impl<'src> Parser<'src> {
    fn new(input: &'src str) -> QueryResult<Self> {
        Ok(Self {
            tokens: lex(input)?,
            pos: 0,
            input,
        })
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|(t, _)| *t)
    }

    fn peek_keyword(&self, word: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some((Token::Ident, span)) => self.input[span.clone()].eq_ignore_ascii_case(word),
            _ => false,
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: &str) -> QueryError {
        match self.tokens.get(self.pos) {
            Some((_, span)) => QueryError::syntax(&self.input[span.clone()], span.start, message),
            None => QueryError::syntax("", self.input.len(), format!("{message}, got end of input")),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> QueryResult<std::ops::Range<usize>> {
        match self.tokens.get(self.pos) {
            Some((token, span)) if *token == expected => {
                let span = span.clone();
                self.pos += 1;
                Ok(span)
            }
            _ => Err(self.error_here(&format!("expected {what}"))),
        }
    }

    fn expect_end(&self) -> QueryResult<()> {
        if self.pos < self.tokens.len() {
            return Err(self.error_here("unexpected trailing input"));
        }
        Ok(())
    }

    fn or_expr(&mut self) -> QueryResult<Option<FilterExpr>> {
        let mut branches = Vec::new();
        if let Some(first) = self.and_expr()? {
            branches.push(first);
        }
        while self.peek_keyword("or") {
            self.advance();
            if let Some(next) = self.and_expr()? {
                branches.push(next);
            }
        }
        Ok(match branches.len() {
            0 => None,
            1 => branches.pop(),
            _ => Some(FilterExpr::Or(branches)),
        })
    }

    fn and_expr(&mut self) -> QueryResult<Option<FilterExpr>> {
        let mut terms = Vec::new();
        let mut need_separator = false;

        loop {
            if self.peek() == Some(Token::Tilde) || self.peek_keyword("and") {
                self.advance();
                need_separator = false;
                continue;
            }
            let starts_term = match self.peek() {
                Some(Token::LParen) => true,
                Some(Token::Ident) => !self.peek_keyword("or"),
                _ => false,
            };
            if !starts_term {
                break;
            }
            if need_separator {
                return Err(self.error_here("expected `~`, `and` or `or` between criteria"));
            }
            if let Some(term) = self.term()? {
                terms.push(term);
            }
            need_separator = true;
        }

        Ok(match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(FilterExpr::And(terms)),
        })
    }

    fn term(&mut self) -> QueryResult<Option<FilterExpr>> {
        if self.peek() == Some(Token::LParen) {
            self.advance();
            let inner = self.or_expr()?;
            self.expect(Token::RParen, "`)`")?;
            return Ok(inner);
        }
        Ok(Some(FilterExpr::Criterion(self.criterion()?)))
    }

    fn criterion(&mut self) -> QueryResult<RawCriterion> {
        let position = self
            .tokens
            .get(self.pos)
            .map_or(self.input.len(), |(_, span)| span.start);
        let path = self.path()?;
        self.expect(Token::Colon, "`:` after attribute path")?;
        let op_span = self.expect(Token::Ident, "operator name")?;
        let operator = self.input[op_span].to_string();
        self.expect(Token::Colon, "`:` after operator")?;
        let values = self.values()?;
        Ok(RawCriterion {
            path,
            operator,
            values,
            position,
        })
    }

    fn path(&mut self) -> QueryResult<Vec<String>> {
        let mut segments = Vec::new();
        let span = self.expect(Token::Ident, "attribute name")?;
        segments.push(self.input[span].to_string());
        while self.peek() == Some(Token::Dot) {
            self.advance();
            let span = self.expect(Token::Ident, "attribute name after `.`")?;
            segments.push(self.input[span].to_string());
        }
        Ok(segments)
    }

    fn values(&mut self) -> QueryResult<Vec<Literal>> {
        let mut values = Vec::new();
        let mut expect_value = true;

        loop {
            match self.peek() {
                Some(Token::Comma) => {
                    self.advance();
                    expect_value = true;
                }
                Some(Token::Number | Token::Str | Token::Url) if expect_value => {
                    values.push(self.literal()?);
                    expect_value = false;
                }
                Some(Token::Ident)
                    if expect_value
                        && (self.peek_keyword("true")
                            || self.peek_keyword("false")
                            || self.peek_keyword("null")) =>
                {
                    values.push(self.literal()?);
                    expect_value = false;
                }
                _ => break,
            }
        }
        Ok(values)
    }

    fn literal(&mut self) -> QueryResult<Literal> {
        let Some((token, span)) = self.advance() else {
            return Err(self.error_here("expected a value"));
        };
        let input = self.input;
        let text = &input[span.clone()];
        match token {
            Token::Number => {
                let low = parse_number(text, span.start)?;
                match self.range_high(span.end)? {
                    Some(high) => Ok(Literal::Range(low, high)),
                    None => Ok(Literal::Value(low)),
                }
            }
            Token::Str => Ok(Literal::Value(classify_string(unescape(text)))),
            Token::Url => Ok(Literal::Value(Value::Url(text.to_string()))),
            _ => {
                if text.eq_ignore_ascii_case("true") {
                    Ok(Literal::Value(Value::Bool(true)))
                } else if text.eq_ignore_ascii_case("false") {
                    Ok(Literal::Value(Value::Bool(false)))
                } else {
                    Ok(Literal::Value(Value::Null))
                }
            }
        }
    }

    /// Upper bound of a `low-high` range whose low bound ends at `low_end`.
    ///
    /// `1-5` lexes as `1` `-5`; `-3--5` lexes as `-3` `-` `-5`. Only tokens
    /// directly adjacent to the low bound are considered.
    fn range_high(&mut self, low_end: usize) -> QueryResult<Option<Value>> {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some((Token::Number, span)), _) if span.start == low_end => {
                let text = &self.input[span.clone()];
                let Some(unsigned) = text.strip_prefix('-') else {
                    return Ok(None);
                };
                let high = parse_number(unsigned, span.start + 1)?;
                self.pos += 1;
                Ok(Some(high))
            }
            (Some((Token::Minus, minus)), Some((Token::Number, span)))
                if minus.start == low_end && span.start == minus.end =>
            {
                let high = parse_number(&self.input[span.clone()], span.start)?;
                self.pos += 2;
                Ok(Some(high))
            }
            (Some((Token::Minus, minus)), _) if minus.start == low_end => Err(QueryError::syntax(
                "-",
                minus.start,
                "range is missing its upper bound",
            )),
            _ => Ok(None),
        }
    }
}

fn parse_number(text: &str, position: usize) -> QueryResult<Value> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|e| QueryError::syntax(text, position, format!("invalid number: {e}")))
    } else {
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|e| QueryError::syntax(text, position, format!("invalid integer: {e}")))
    }
}

/// Strip the quotes and resolve backslash escapes.
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Quoted strings holding a full ISO-8601 timestamp become timestamps and
/// strings with an http(s) scheme become URLs.
fn classify_string(text: String) -> Value {
    if let Some(timestamp) = parse_timestamp(&text) {
        return Value::Timestamp(timestamp);
    }
    if text.starts_with("http://") || text.starts_with("https://") {
        return Value::Url(text);
    }
    Value::String(text)
}

fn parse_timestamp(text: &str) -> Option<DateTime<chrono::FixedOffset>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}
