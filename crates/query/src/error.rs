//! Query error model.

use quarry_core::{CoreError, ValueKind};
use thiserror::Error;

use crate::spec::FilterOperator;

pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while parsing or compiling specifications.
///
/// Every variant is raised before any backend work begins; a specification
/// that compiles never fails halfway through evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed CQL text.
    #[error("syntax error at {position} near `{fragment}`: {message}")]
    Syntax {
        fragment: String,
        position: usize,
        message: String,
    },

    /// Attribute path did not resolve against the queried type.
    #[error(transparent)]
    InvalidAttribute(#[from] CoreError),

    /// Operator cannot be applied to the attribute's declared kind.
    #[error("operator `{operator}` cannot be applied to `{path}` of kind {kind}")]
    OperatorMismatch {
        path: String,
        operator: FilterOperator,
        kind: String,
    },

    /// Operand arity or literal type does not fit the operator.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// Specification has no textual CQL form.
    #[error("specification cannot be expressed in CQL: {0}")]
    Unrepresentable(String),
}

impl QueryError {
    pub fn syntax(fragment: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            fragment: fragment.into(),
            position,
            message: message.into(),
        }
    }

    pub fn mismatch(path: impl Into<String>, operator: FilterOperator, kind: impl Into<String>) -> Self {
        Self::OperatorMismatch {
            path: path.into(),
            operator,
            kind: kind.into(),
        }
    }

    pub fn operand(msg: impl Into<String>) -> Self {
        Self::InvalidOperand(msg.into())
    }

    pub(crate) fn relation_mismatch(path: &str, operator: FilterOperator) -> Self {
        Self::mismatch(path, operator, "relation")
    }

    pub(crate) fn kind_mismatch(path: &str, operator: FilterOperator, kind: ValueKind) -> Self {
        Self::mismatch(path, operator, kind.to_string())
    }
}
