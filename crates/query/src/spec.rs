//! Specification AST for filtering and ordering.
//!
//! Specifications are immutable, backend-independent trees. Filter leaves
//! ([`Criterion`]) pair an attribute path with an operator and an operand;
//! order leaves pair a path with a direction. Composite constructors flatten
//! nested composites of the same kind, so `a & (b & c)` and `(a & b) & c`
//! build the same tree.

use core::ops::{BitAnd, BitOr, Not};

use quarry_core::Value;
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Filter operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOperator {
    EqualTo,
    NotEqualTo,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    StartsWith,
    EndsWith,
    Contains,
    NotContains,
    Contained,
    NotContained,
    InRange,
}

/// Shape of operand an operator takes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arity {
    Single,
    Pair,
    List,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 13] = [
        FilterOperator::EqualTo,
        FilterOperator::NotEqualTo,
        FilterOperator::LessThan,
        FilterOperator::LessThanOrEqualTo,
        FilterOperator::GreaterThan,
        FilterOperator::GreaterThanOrEqualTo,
        FilterOperator::StartsWith,
        FilterOperator::EndsWith,
        FilterOperator::Contains,
        FilterOperator::NotContains,
        FilterOperator::Contained,
        FilterOperator::NotContained,
        FilterOperator::InRange,
    ];

    /// CQL name of the operator.
    pub fn name(self) -> &'static str {
        match self {
            FilterOperator::EqualTo => "equal-to",
            FilterOperator::NotEqualTo => "not-equal-to",
            FilterOperator::LessThan => "less-than",
            FilterOperator::LessThanOrEqualTo => "less-than-or-equal-to",
            FilterOperator::GreaterThan => "greater-than",
            FilterOperator::GreaterThanOrEqualTo => "greater-than-or-equal-to",
            FilterOperator::StartsWith => "starts-with",
            FilterOperator::EndsWith => "ends-with",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "not-contains",
            FilterOperator::Contained => "contained",
            FilterOperator::NotContained => "not-contained",
            FilterOperator::InRange => "in-range",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn arity(self) -> Arity {
        match self {
            FilterOperator::InRange => Arity::Pair,
            FilterOperator::Contained | FilterOperator::NotContained => Arity::List,
            _ => Arity::Single,
        }
    }

    /// Substring operators; only valid on textual attributes.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            FilterOperator::StartsWith
                | FilterOperator::EndsWith
                | FilterOperator::Contains
                | FilterOperator::NotContains
        )
    }

    /// Operators that need an ordered attribute kind.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            FilterOperator::LessThan
                | FilterOperator::LessThanOrEqualTo
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqualTo
                | FilterOperator::InRange
        )
    }

    /// Operators that compare identity rather than content, and so may be
    /// applied to a relation.
    pub fn is_identity(self) -> bool {
        matches!(
            self,
            FilterOperator::EqualTo
                | FilterOperator::NotEqualTo
                | FilterOperator::Contained
                | FilterOperator::NotContained
        )
    }

    /// The operator with the opposite meaning, when one exists.
    pub fn negated(self) -> Option<Self> {
        match self {
            FilterOperator::EqualTo => Some(FilterOperator::NotEqualTo),
            FilterOperator::NotEqualTo => Some(FilterOperator::EqualTo),
            FilterOperator::Contains => Some(FilterOperator::NotContains),
            FilterOperator::NotContains => Some(FilterOperator::Contains),
            FilterOperator::Contained => Some(FilterOperator::NotContained),
            FilterOperator::NotContained => Some(FilterOperator::Contained),
            _ => None,
        }
    }
}

impl core::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operand of a filter criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "values", rename_all = "snake_case")]
pub enum Operand {
    Single(Value),
    /// Closed interval `[low, high]`.
    Range(Value, Value),
    List(Vec<Value>),
}

impl Operand {
    pub fn arity(&self) -> Arity {
        match self {
            Operand::Single(_) => Arity::Single,
            Operand::Range(..) => Arity::Pair,
            Operand::List(_) => Arity::List,
        }
    }

    /// All literal values carried by the operand.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Operand::Single(v) => vec![v],
            Operand::Range(low, high) => vec![low, high],
            Operand::List(vs) => vs.iter().collect(),
        }
    }
}

/// Leaf predicate: `path operator operand`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    path: String,
    operator: FilterOperator,
    operand: Operand,
}

impl Criterion {
    /// Build a criterion, checking the operand arity against the operator.
    pub fn new(path: impl Into<String>, operator: FilterOperator, operand: Operand) -> QueryResult<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(QueryError::operand("empty attribute path"));
        }
        if operand.arity() != operator.arity() {
            return Err(QueryError::operand(format!(
                "`{operator}` on `{path}` expects a {:?} operand, got {:?}",
                operator.arity(),
                operand.arity()
            )));
        }
        Ok(Self { path, operator, operand })
    }

    fn single(path: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            operator,
            operand: Operand::Single(value.into()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }
}

/// Filter specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSpec {
    Nullary(Criterion),
    Conjunction(Vec<FilterSpec>),
    Disjunction(Vec<FilterSpec>),
    Negation(Box<FilterSpec>),
}

impl FilterSpec {
    /// Conjunction of `specs`, flattening nested conjunctions. A single spec
    /// is returned unwrapped.
    pub fn all(specs: impl IntoIterator<Item = FilterSpec>) -> FilterSpec {
        let mut children = Vec::new();
        for spec in specs {
            match spec {
                FilterSpec::Conjunction(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        collapse(children, FilterSpec::Conjunction)
    }

    /// Disjunction of `specs`, flattening nested disjunctions.
    pub fn any(specs: impl IntoIterator<Item = FilterSpec>) -> FilterSpec {
        let mut children = Vec::new();
        for spec in specs {
            match spec {
                FilterSpec::Disjunction(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        collapse(children, FilterSpec::Disjunction)
    }

    pub fn negate(self) -> FilterSpec {
        FilterSpec::Negation(Box::new(self))
    }

    pub fn as_criterion(&self) -> Option<&Criterion> {
        match self {
            FilterSpec::Nullary(c) => Some(c),
            _ => None,
        }
    }
}

fn collapse(mut children: Vec<FilterSpec>, wrap: fn(Vec<FilterSpec>) -> FilterSpec) -> FilterSpec {
    if children.len() == 1 {
        if let Some(only) = children.pop() {
            return only;
        }
    }
    wrap(children)
}

impl From<Criterion> for FilterSpec {
    fn from(criterion: Criterion) -> Self {
        FilterSpec::Nullary(criterion)
    }
}

impl BitAnd for FilterSpec {
    type Output = FilterSpec;

    fn bitand(self, rhs: FilterSpec) -> FilterSpec {
        FilterSpec::all([self, rhs])
    }
}

impl BitOr for FilterSpec {
    type Output = FilterSpec;

    fn bitor(self, rhs: FilterSpec) -> FilterSpec {
        FilterSpec::any([self, rhs])
    }
}

impl Not for FilterSpec {
    type Output = FilterSpec;

    fn not(self) -> FilterSpec {
        self.negate()
    }
}

/// Sort direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Order leaf: sort by `path` in `direction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub path: String,
    pub direction: Direction,
}

/// Order specification. Children of a conjunction are sort keys from
/// primary to least significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSpec {
    Nullary(OrderKey),
    Conjunction(Vec<OrderSpec>),
}

impl OrderSpec {
    pub fn all(specs: impl IntoIterator<Item = OrderSpec>) -> OrderSpec {
        let mut children = Vec::new();
        for spec in specs {
            match spec {
                OrderSpec::Conjunction(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        if children.len() == 1 {
            if let Some(only) = children.pop() {
                return only;
            }
        }
        OrderSpec::Conjunction(children)
    }

    /// Sort keys in precedence order.
    pub fn keys(&self) -> Vec<&OrderKey> {
        match self {
            OrderSpec::Nullary(key) => vec![key],
            OrderSpec::Conjunction(children) => children.iter().flat_map(OrderSpec::keys).collect(),
        }
    }
}

impl BitAnd for OrderSpec {
    type Output = OrderSpec;

    fn bitand(self, rhs: OrderSpec) -> OrderSpec {
        OrderSpec::all([self, rhs])
    }
}

pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::EqualTo, value).into()
}

pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::NotEqualTo, value).into()
}

pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::LessThan, value).into()
}

pub fn le(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::LessThanOrEqualTo, value).into()
}

pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::GreaterThan, value).into()
}

pub fn ge(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::GreaterThanOrEqualTo, value).into()
}

pub fn starts_with(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::StartsWith, value).into()
}

pub fn ends_with(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::EndsWith, value).into()
}

pub fn contains(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::Contains, value).into()
}

pub fn not_contains(path: impl Into<String>, value: impl Into<Value>) -> FilterSpec {
    Criterion::single(path, FilterOperator::NotContains, value).into()
}

pub fn contained<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> FilterSpec {
    FilterSpec::Nullary(Criterion {
        path: path.into(),
        operator: FilterOperator::Contained,
        operand: Operand::List(values.into_iter().map(Into::into).collect()),
    })
}

pub fn not_contained<V: Into<Value>>(
    path: impl Into<String>,
    values: impl IntoIterator<Item = V>,
) -> FilterSpec {
    FilterSpec::Nullary(Criterion {
        path: path.into(),
        operator: FilterOperator::NotContained,
        operand: Operand::List(values.into_iter().map(Into::into).collect()),
    })
}

pub fn in_range(path: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> FilterSpec {
    FilterSpec::Nullary(Criterion {
        path: path.into(),
        operator: FilterOperator::InRange,
        operand: Operand::Range(low.into(), high.into()),
    })
}

pub fn asc(path: impl Into<String>) -> OrderSpec {
    OrderSpec::Nullary(OrderKey {
        path: path.into(),
        direction: Direction::Asc,
    })
}

pub fn desc(path: impl Into<String>) -> OrderSpec {
    OrderSpec::Nullary(OrderKey {
        path: path.into(),
        direction: Direction::Desc,
    })
}
