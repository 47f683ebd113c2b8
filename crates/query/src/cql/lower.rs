//! Lowering of parsed CQL into filter specifications.

use quarry_core::Value;

use super::parser::{FilterExpr, Literal, RawCriterion, identifier_path};
use crate::error::{QueryError, QueryResult};
use crate::spec::{Arity, Criterion, FilterOperator, FilterSpec, Operand};

pub(crate) fn lower(expr: FilterExpr) -> QueryResult<FilterSpec> {
    match expr {
        FilterExpr::Criterion(raw) => lower_criterion(raw),
        FilterExpr::And(terms) => Ok(FilterSpec::all(
            terms.into_iter().map(lower).collect::<QueryResult<Vec<_>>>()?,
        )),
        FilterExpr::Or(branches) => Ok(FilterSpec::any(
            branches.into_iter().map(lower).collect::<QueryResult<Vec<_>>>()?,
        )),
    }
}

/// Resolve the operator name, honouring a `not-` prefix for operators
/// without a negated counterpart of their own.
fn resolve_operator(raw: &RawCriterion) -> QueryResult<(FilterOperator, bool)> {
    if let Some(op) = FilterOperator::from_name(&raw.operator) {
        return Ok((op, false));
    }
    if let Some(op) = raw.operator.strip_prefix("not-").and_then(FilterOperator::from_name) {
        return Ok((op, true));
    }
    Err(QueryError::syntax(
        raw.operator.clone(),
        raw.position,
        "unknown filter operator",
    ))
}

/// Lower one criterion.
///
/// Duplicate literals and empty strings are dropped. Membership operators
/// keep the list as their operand; any other operator yields one criterion
/// per literal, joined by a disjunction. An empty list matches nothing.
fn lower_criterion(raw: RawCriterion) -> QueryResult<FilterSpec> {
    let (operator, negate) = resolve_operator(&raw)?;
    let path = identifier_path(&raw.path);

    let mut literals: Vec<Literal> = Vec::with_capacity(raw.values.len());
    for literal in raw.values {
        let empty = matches!(&literal, Literal::Value(Value::String(s)) if s.is_empty());
        if !empty && !literals.contains(&literal) {
            literals.push(literal);
        }
    }

    if literals.is_empty() {
        let empty_operator = if operator == FilterOperator::NotContained && !negate {
            FilterOperator::NotContained
        } else {
            FilterOperator::Contained
        };
        return Ok(Criterion::new(path, empty_operator, Operand::List(Vec::new()))?.into());
    }

    let wrap = |criterion: Criterion| {
        let spec = FilterSpec::Nullary(criterion);
        if negate { spec.negate() } else { spec }
    };

    match operator.arity() {
        Arity::List => {
            let values = literals
                .into_iter()
                .map(|l| scalar(l, &path, operator))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(wrap(Criterion::new(path, operator, Operand::List(values))?))
        }
        Arity::Pair => {
            let specs = literals
                .into_iter()
                .map(|l| match l {
                    Literal::Range(low, high) => {
                        Ok(wrap(Criterion::new(path.clone(), operator, Operand::Range(low, high))?))
                    }
                    Literal::Value(v) => Err(QueryError::operand(format!(
                        "`{operator}` on `{path}` needs a `low-high` range, got {v}"
                    ))),
                })
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(FilterSpec::any(specs))
        }
        Arity::Single => {
            let specs = literals
                .into_iter()
                .map(|l| {
                    let value = scalar(l, &path, operator)?;
                    Ok(wrap(Criterion::new(path.clone(), operator, Operand::Single(value))?))
                })
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(FilterSpec::any(specs))
        }
    }
}

fn scalar(literal: Literal, path: &str, operator: FilterOperator) -> QueryResult<Value> {
    match literal {
        Literal::Value(v) => Ok(v),
        Literal::Range(low, high) => Err(QueryError::operand(format!(
            "range {low}-{high} is only valid with `in-range`, not `{operator}` on `{path}`"
        ))),
    }
}
