//! Compile-time checks shared by every backend.
//!
//! A criterion's path is resolved once against the queried type and the
//! operator and literals are checked against what the path ends in. Both
//! backends call these before building anything, so a bad query fails the
//! same way everywhere.

use std::any::TypeId;

use quarry_core::{AttributeKind, AttributeStep, Schema, Value, ValueKind};

use crate::error::{QueryError, QueryResult};
use crate::spec::{Criterion, FilterOperator, OrderKey};

/// Resolve and type-check a filter criterion.
pub fn criterion<'s>(schema: &'s Schema, root: TypeId, criterion: &Criterion) -> QueryResult<Vec<AttributeStep<'s>>> {
    let steps = schema.inspect(root, criterion.path())?;
    let Some(last) = steps.last() else {
        return Err(QueryError::operand("empty attribute path"));
    };
    let operator = criterion.operator();
    let path = criterion.path();

    match last.kind {
        AttributeKind::Terminal => {
            if let Some(kind) = last.attribute.value_kind {
                check_terminal(path, operator, kind)?;
                for value in criterion.operand().values() {
                    if !kind.accepts(value) {
                        return Err(QueryError::operand(format!(
                            "{value} is not a valid {kind} literal for `{path}`"
                        )));
                    }
                }
            }
        }
        AttributeKind::ToOne | AttributeKind::ToMany => {
            if !operator.is_identity() {
                return Err(QueryError::relation_mismatch(path, operator));
            }
            for value in criterion.operand().values() {
                if !ValueKind::Int.accepts(value) || matches!(value, Value::Float(_)) {
                    return Err(QueryError::operand(format!(
                        "relation `{path}` compares ids, got {value}"
                    )));
                }
            }
        }
    }
    Ok(steps)
}

fn check_terminal(path: &str, operator: FilterOperator, kind: ValueKind) -> QueryResult<()> {
    if operator.is_ordering() && !kind.is_ordered() {
        return Err(QueryError::kind_mismatch(path, operator, kind));
    }
    if operator.is_textual() && !kind.is_textual() {
        return Err(QueryError::kind_mismatch(path, operator, kind));
    }
    Ok(())
}

/// Resolve an order key. Sorting through a to-many hop has no single key
/// and is rejected.
pub fn order_key<'s>(schema: &'s Schema, root: TypeId, key: &OrderKey) -> QueryResult<Vec<AttributeStep<'s>>> {
    let steps = schema.inspect(root, &key.path)?;
    if steps.iter().any(|s| s.kind == AttributeKind::ToMany) {
        return Err(QueryError::operand(format!(
            "cannot order by `{}`: path crosses a to-many relation",
            key.path
        )));
    }
    Ok(steps)
}
