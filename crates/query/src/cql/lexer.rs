//! Lexer for CQL filter and order expressions.
//!
//! Tokens carry only their kind; text is sliced from the source by span when
//! the parser needs it. Whitespace is skipped.

use std::ops::Range;

use logos::Logos;

use crate::error::{QueryError, QueryResult};

#[derive(Logos, Debug, Copy, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub(crate) enum Token {
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(":")]
    Colon,

    #[token(",")]
    Comma,

    /// Conjunction separator.
    #[token("~")]
    Tilde,

    #[token(".")]
    Dot,

    /// Only meaningful between the bounds of a numeric range.
    #[token("-")]
    Minus,

    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
    Number,

    #[regex(r#""(?:[^"\\]|\\.)*""#)]
    #[regex(r"'(?:[^'\\]|\\.)*'")]
    Str,

    /// Bare absolute URL.
    #[regex(r#"https?://[^\s,~()"']+"#)]
    Url,

    /// Attribute path segments, operator names and keywords.
    #[regex(r"[A-Za-z][A-Za-z0-9_\-]*")]
    Ident,
}

pub(crate) type Spanned = (Token, Range<usize>);

/// Tokenizes `source`, failing on the first character no token accepts.
pub(crate) fn lex(source: &str) -> QueryResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(source).spanned() {
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(QueryError::syntax(
                    &source[span.clone()],
                    span.start,
                    "unexpected character",
                ));
            }
        }
    }
    Ok(tokens)
}
