//! `quarry-query` — backend-independent filter and order specifications.
//!
//! Specifications are built with the helpers in [`spec`] or parsed from CQL
//! text ([`cql`]), then compiled by a backend: [`eval`] for in-process
//! predicates and comparators, [`sql`] for relational queries.

pub mod cql;
pub mod error;
pub mod eval;
pub mod resolve;
pub mod spec;
pub mod sql;
pub mod visitor;

pub use cql::{parse_filter, parse_order};
pub use error::{QueryError, QueryResult};
pub use eval::{Comparator, Predicate, compile_filter, compile_order};
pub use spec::{
    Arity, Criterion, Direction, FilterOperator, FilterSpec, Operand, OrderKey, OrderSpec, asc, contained, contains,
    desc, ends_with, eq, ge, gt, in_range, le, lt, ne, not_contained, not_contains, starts_with,
};
pub use visitor::{FilterVisitor, OrderVisitor};
