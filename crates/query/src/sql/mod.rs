//! Relational (SQL) backend.

mod compile;
mod expr;

pub use compile::{SqlFilterVisitor, SqlOrderVisitor, select};
pub use expr::{
    ColumnRef, ComparisonOp, Join, OrderTerm, ROOT_ALIAS, RenderedQuery, SelectQuery, SqlExpr, escape_like,
};
