//! CQL rendering of specifications.
//!
//! The output re-parses to an equivalent specification. Runs of
//! single-valued criteria on the same path and operator inside a disjunction
//! are merged back into one value list. Negated composites, and negations
//! that would re-parse as a different operator, are rejected as
//! unrepresentable.

use quarry_core::Value;

use crate::error::{QueryError, QueryResult};
use crate::spec::{Criterion, FilterOperator, FilterSpec, Operand, OrderKey, OrderSpec};
use crate::visitor::{FilterVisitor, OrderVisitor};

enum Fragment {
    Criterion {
        path: String,
        operator: String,
        values: Vec<String>,
        mergeable: bool,
    },
    And(String),
    Or(String),
}

impl Fragment {
    fn render(self) -> String {
        match self {
            Fragment::Criterion {
                path,
                operator,
                values,
                ..
            } => format!("{path}:{operator}:{}", values.join(",")),
            Fragment::And(text) | Fragment::Or(text) => text,
        }
    }
}

fn slug_path(path: &str) -> String {
    path.replace('_', "-")
}

fn range_literal(low: &Value, high: &Value) -> QueryResult<String> {
    match (low, high) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(format!("{low}-{high}")),
        _ => Err(QueryError::Unrepresentable(format!(
            "range bounds {low} and {high} are not numeric"
        ))),
    }
}

struct CqlFilterWriter;

impl FilterVisitor for CqlFilterWriter {
    type Output = Fragment;

    fn visit_nullary(&mut self, criterion: &Criterion) -> QueryResult<Fragment> {
        let (values, mergeable) = match criterion.operand() {
            Operand::Single(v) => (vec![v.to_string()], true),
            Operand::Range(low, high) => (vec![range_literal(low, high)?], true),
            Operand::List(vs) => (vs.iter().map(Value::to_string).collect(), false),
        };
        Ok(Fragment::Criterion {
            path: slug_path(criterion.path()),
            operator: criterion.operator().name().to_string(),
            values,
            mergeable,
        })
    }

    fn visit_conjunction(&mut self, children: Vec<Fragment>) -> QueryResult<Fragment> {
        if children.is_empty() {
            return Err(QueryError::Unrepresentable("empty conjunction".to_string()));
        }
        let parts: Vec<String> = children
            .into_iter()
            .map(|child| match child {
                Fragment::Or(text) => format!("({text})"),
                other => other.render(),
            })
            .collect();
        Ok(Fragment::And(parts.join("~")))
    }

    fn visit_disjunction(&mut self, children: Vec<Fragment>) -> QueryResult<Fragment> {
        if children.is_empty() {
            return Err(QueryError::Unrepresentable("empty disjunction".to_string()));
        }
        let mut merged: Vec<Fragment> = Vec::with_capacity(children.len());
        for child in children {
            if let (
                Some(Fragment::Criterion {
                    path,
                    operator,
                    values,
                    mergeable: true,
                }),
                Fragment::Criterion {
                    path: next_path,
                    operator: next_operator,
                    values: next_values,
                    mergeable: true,
                },
            ) = (merged.last_mut(), &child)
            {
                // Repeated literals would be dropped on re-parse, so they
                // stay in separate criteria.
                if *path == *next_path
                    && *operator == *next_operator
                    && next_values.iter().all(|v| !values.contains(v))
                {
                    values.extend(next_values.iter().cloned());
                    continue;
                }
            }
            merged.push(child);
        }

        if merged.len() == 1 {
            if let Some(only) = merged.pop() {
                return Ok(only);
            }
        }
        let parts: Vec<String> = merged.into_iter().map(Fragment::render).collect();
        Ok(Fragment::Or(parts.join(" or ")))
    }

    /// `not-X` re-parses as `Negation(X)` only when no operator is named
    /// `not-X`. `equal-to`, `contains` and `contained` have such operators,
    /// which fail on null where the negation succeeds, so their negations
    /// cannot be written. An empty value list re-parses as `contained` and
    /// loses the negation too.
    fn visit_negation(&mut self, child: Fragment) -> QueryResult<Fragment> {
        match child {
            Fragment::Criterion {
                path,
                operator,
                values,
                mergeable,
            } => {
                let negated = format!("not-{operator}");
                if FilterOperator::from_name(&negated).is_some() {
                    return Err(QueryError::Unrepresentable(format!(
                        "negated `{operator}` on `{path}` differs from `{negated}` on null"
                    )));
                }
                if values.is_empty() {
                    return Err(QueryError::Unrepresentable(format!(
                        "negated `{operator}` on `{path}` without values"
                    )));
                }
                Ok(Fragment::Criterion {
                    path,
                    operator: negated,
                    values,
                    mergeable,
                })
            }
            Fragment::And(text) | Fragment::Or(text) => Err(QueryError::Unrepresentable(format!(
                "negated composite `{text}`"
            ))),
        }
    }
}

struct CqlOrderWriter;

impl OrderVisitor for CqlOrderWriter {
    type Output = String;

    fn visit_nullary(&mut self, key: &OrderKey) -> QueryResult<String> {
        Ok(format!("{}:{}", slug_path(&key.path), key.direction.name()))
    }

    fn visit_conjunction(&mut self, children: Vec<String>) -> QueryResult<String> {
        Ok(children.join("~"))
    }
}

impl FilterSpec {
    /// Render as CQL filter text.
    pub fn to_cql(&self) -> QueryResult<String> {
        Ok(self.accept(&mut CqlFilterWriter)?.render())
    }
}

impl OrderSpec {
    /// Render as CQL order text.
    pub fn to_cql(&self) -> String {
        self.accept(&mut CqlOrderWriter).unwrap_or_default()
    }
}
