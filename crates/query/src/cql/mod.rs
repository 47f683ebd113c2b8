//! CQL: the compact textual query language.
//!
//! Filters look like `age:greater-than:21~name:starts-with:"Al"`, orders
//! like `age:asc~name:desc`.

mod lexer;
mod lower;
mod parser;
mod serialize;

pub use parser::{FilterExpr, Literal, RawCriterion, parse_filter_expr, parse_order};

use crate::error::QueryResult;
use crate::spec::FilterSpec;

/// Parse filter text into a filter specification.
pub fn parse_filter(input: &str) -> QueryResult<FilterSpec> {
    let expr = parse_filter_expr(input)?;
    let spec = lower::lower(expr)?;
    tracing::trace!(cql = input, ?spec, "parsed filter");
    Ok(spec)
}
