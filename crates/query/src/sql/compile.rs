//! Relational backend: lowers specifications into [`SqlExpr`] and
//! [`SelectQuery`] values.
//!
//! Filter relation hops become correlated `EXISTS` sub-selects (aliases
//! `s1`, `s2`, ...). Order hops become `LEFT JOIN`s (aliases `j1`, `j2`,
//! ...), one per distinct relation path.

use std::any::TypeId;

use quarry_core::{AttributeKind, AttributeStep, Entity, EntityMeta, Schema, Value};

use super::expr::{ColumnRef, ComparisonOp, Join, OrderTerm, ROOT_ALIAS, SelectQuery, SqlExpr, escape_like};
use crate::error::{QueryError, QueryResult};
use crate::resolve;
use crate::spec::{Criterion, FilterOperator, FilterSpec, Operand, OrderKey, OrderSpec};
use crate::visitor::{FilterVisitor, OrderVisitor};

pub struct SqlFilterVisitor<'s> {
    schema: &'s Schema,
    root: TypeId,
    next_alias: usize,
}

impl<'s> SqlFilterVisitor<'s> {
    pub fn new(schema: &'s Schema, root: TypeId) -> Self {
        Self {
            schema,
            root,
            next_alias: 0,
        }
    }

    fn alias(&mut self) -> String {
        self.next_alias += 1;
        format!("s{}", self.next_alias)
    }

    /// Build the expression for `steps`, evaluated against rows aliased
    /// `owner`.
    fn hop(&mut self, owner: &str, steps: &[AttributeStep<'s>], criterion: &Criterion) -> QueryResult<SqlExpr> {
        let Some((step, rest)) = steps.split_first() else {
            return Err(QueryError::operand("empty attribute path"));
        };
        let schema = self.schema;

        match (step.kind, rest.is_empty()) {
            (AttributeKind::Terminal, _) => Ok(leaf(
                ColumnRef::new(owner, step.attribute.column),
                criterion.operator(),
                criterion.operand(),
            )),
            (AttributeKind::ToOne, true) => Ok(leaf(
                ColumnRef::new(owner, step.attribute.column),
                criterion.operator(),
                criterion.operand(),
            )),
            (AttributeKind::ToOne, false) => {
                let target = schema.target_of(step.attribute)?;
                let alias = self.alias();
                let correlation = SqlExpr::ColumnsEqual(
                    ColumnRef::new(alias.clone(), target.id_column),
                    ColumnRef::new(owner, step.attribute.column),
                );
                let inner = self.hop(&alias, rest, criterion)?;
                Ok(exists(target, alias, correlation, inner))
            }
            (AttributeKind::ToMany, last) => {
                let target = schema.target_of(step.attribute)?;
                let alias = self.alias();
                let remote = step.attribute.remote_column.unwrap_or(step.attribute.column);
                let correlation = SqlExpr::ColumnsEqual(
                    ColumnRef::new(alias.clone(), remote),
                    ColumnRef::new(owner, step.owner.id_column),
                );
                let inner = if last {
                    leaf(
                        ColumnRef::new(alias.clone(), target.id_column),
                        criterion.operator(),
                        criterion.operand(),
                    )
                } else {
                    self.hop(&alias, rest, criterion)?
                };
                Ok(exists(target, alias, correlation, inner))
            }
        }
    }
}

fn exists(target: &EntityMeta, alias: String, correlation: SqlExpr, inner: SqlExpr) -> SqlExpr {
    SqlExpr::Exists {
        table: target.table.to_string(),
        alias,
        condition: Box::new(SqlExpr::And(vec![correlation, inner])),
    }
}

/// Apply `operator` to a column.
fn leaf(column: ColumnRef, operator: FilterOperator, operand: &Operand) -> SqlExpr {
    use FilterOperator as Op;

    let compare = |column: ColumnRef, op: ComparisonOp, value: &Value| SqlExpr::Compare {
        column,
        op,
        value: value.clone(),
    };
    let like = |column: ColumnRef, value: &Value, prefix: &str, suffix: &str, negated: bool| {
        let needle = value.as_str().map(escape_like).unwrap_or_default();
        SqlExpr::Like {
            column,
            pattern: format!("{prefix}{needle}{suffix}"),
            negated,
        }
    };

    match (operator, operand) {
        (Op::EqualTo, Operand::Single(Value::Null)) => SqlExpr::IsNull { column, negated: false },
        (Op::NotEqualTo, Operand::Single(Value::Null)) => SqlExpr::IsNull { column, negated: true },
        (Op::EqualTo, Operand::Single(v)) => compare(column, ComparisonOp::Eq, v),
        (Op::NotEqualTo, Operand::Single(v)) => compare(column, ComparisonOp::Ne, v),
        (Op::LessThan, Operand::Single(v)) => compare(column, ComparisonOp::Lt, v),
        (Op::LessThanOrEqualTo, Operand::Single(v)) => compare(column, ComparisonOp::Le, v),
        (Op::GreaterThan, Operand::Single(v)) => compare(column, ComparisonOp::Gt, v),
        (Op::GreaterThanOrEqualTo, Operand::Single(v)) => compare(column, ComparisonOp::Ge, v),
        (Op::InRange, Operand::Range(low, high)) => SqlExpr::Between {
            column,
            low: low.clone(),
            high: high.clone(),
        },
        (Op::StartsWith, Operand::Single(v)) => like(column, v, "", "%", false),
        (Op::EndsWith, Operand::Single(v)) => like(column, v, "%", "", false),
        (Op::Contains, Operand::Single(v)) => like(column, v, "%", "%", false),
        (Op::NotContains, Operand::Single(v)) => like(column, v, "%", "%", true),
        (Op::Contained | Op::NotContained, Operand::List(values)) => {
            let negated = operator == Op::NotContained;
            let values: Vec<Value> = values.iter().filter(|v| !v.is_null()).cloned().collect();
            match (values.is_empty(), negated) {
                (true, false) => SqlExpr::Bool(false),
                (true, true) => SqlExpr::IsNull { column, negated: true },
                (false, _) => SqlExpr::In {
                    column,
                    values,
                    negated,
                },
            }
        }
        // Criterion::new rules out any other pairing.
        _ => SqlExpr::Bool(false),
    }
}

impl<'s> FilterVisitor for SqlFilterVisitor<'s> {
    type Output = SqlExpr;

    fn visit_nullary(&mut self, criterion: &Criterion) -> QueryResult<SqlExpr> {
        let steps = resolve::criterion(self.schema, self.root, criterion)?;
        self.hop(ROOT_ALIAS, &steps, criterion)
    }

    fn visit_conjunction(&mut self, children: Vec<SqlExpr>) -> QueryResult<SqlExpr> {
        Ok(SqlExpr::And(children))
    }

    fn visit_disjunction(&mut self, children: Vec<SqlExpr>) -> QueryResult<SqlExpr> {
        Ok(SqlExpr::Or(children))
    }

    fn visit_negation(&mut self, child: SqlExpr) -> QueryResult<SqlExpr> {
        Ok(SqlExpr::Not(Box::new(child)))
    }
}

/// Compiles order specifications into `ORDER BY` terms, recording the joins
/// they need.
pub struct SqlOrderVisitor<'s> {
    schema: &'s Schema,
    root: TypeId,
    /// Joins keyed by the relation path they resolve.
    joins: Vec<(String, Join)>,
}

impl<'s> SqlOrderVisitor<'s> {
    pub fn new(schema: &'s Schema, root: TypeId) -> Self {
        Self {
            schema,
            root,
            joins: Vec::new(),
        }
    }

    pub fn into_joins(self) -> Vec<Join> {
        self.joins.into_iter().map(|(_, join)| join).collect()
    }

    /// Alias of the join for `path`, adding the join on first use.
    fn join(&mut self, path: &str, owner: &str, step: &AttributeStep<'s>) -> QueryResult<String> {
        if let Some((_, join)) = self.joins.iter().find(|(p, _)| p == path) {
            return Ok(join.alias.clone());
        }
        let schema = self.schema;
        let target = schema.target_of(step.attribute)?;
        let alias = format!("j{}", self.joins.len() + 1);
        let on = SqlExpr::ColumnsEqual(
            ColumnRef::new(alias.clone(), target.id_column),
            ColumnRef::new(owner, step.attribute.column),
        );
        self.joins.push((
            path.to_string(),
            Join {
                table: target.table.to_string(),
                alias: alias.clone(),
                on,
            },
        ));
        Ok(alias)
    }
}

impl<'s> OrderVisitor for SqlOrderVisitor<'s> {
    type Output = Vec<OrderTerm>;

    fn visit_nullary(&mut self, key: &OrderKey) -> QueryResult<Vec<OrderTerm>> {
        let steps = resolve::order_key(self.schema, self.root, key)?;
        let mut owner = ROOT_ALIAS.to_string();
        let mut path = String::new();

        for (idx, step) in steps.iter().enumerate() {
            if idx + 1 == steps.len() {
                return Ok(vec![OrderTerm {
                    column: ColumnRef::new(owner, step.attribute.column),
                    direction: key.direction,
                }]);
            }
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(step.attribute.name);
            owner = self.join(&path, &owner, step)?;
        }
        Err(QueryError::operand("empty attribute path"))
    }

    fn visit_conjunction(&mut self, children: Vec<Vec<OrderTerm>>) -> QueryResult<Vec<OrderTerm>> {
        Ok(children.into_iter().flatten().collect())
    }
}

/// Assemble one `SELECT` for entities of type `E`.
///
/// `window` is `(offset, limit)`.
pub fn select<E: Entity>(
    schema: &Schema,
    filter: Option<&FilterSpec>,
    order: Option<&OrderSpec>,
    window: Option<(usize, usize)>,
) -> QueryResult<SelectQuery> {
    let root = TypeId::of::<E>();
    let meta = schema.meta_of::<E>()?;
    let mut query = SelectQuery::new(meta.table);

    if let Some(filter) = filter {
        query.filter = Some(filter.accept(&mut SqlFilterVisitor::new(schema, root))?);
    }
    if let Some(order) = order {
        let mut visitor = SqlOrderVisitor::new(schema, root);
        query.order_by = order.accept(&mut visitor)?;
        query.joins = visitor.into_joins();
    }
    if let Some((offset, limit)) = window {
        query.offset = Some(offset);
        query.limit = Some(limit);
    }
    Ok(query)
}
