//! Visitor protocol over specification trees.
//!
//! `accept` walks a tree bottom-up: children are compiled first and their
//! outputs handed to the composite's visit method. Backends implement the
//! visitor traits; callers only ever see `accept`.

use crate::error::QueryResult;
use crate::spec::{Criterion, FilterSpec, OrderKey, OrderSpec};

pub trait FilterVisitor {
    type Output;

    fn visit_nullary(&mut self, criterion: &Criterion) -> QueryResult<Self::Output>;

    fn visit_conjunction(&mut self, children: Vec<Self::Output>) -> QueryResult<Self::Output>;

    fn visit_disjunction(&mut self, children: Vec<Self::Output>) -> QueryResult<Self::Output>;

    fn visit_negation(&mut self, child: Self::Output) -> QueryResult<Self::Output>;
}

pub trait OrderVisitor {
    type Output;

    fn visit_nullary(&mut self, key: &OrderKey) -> QueryResult<Self::Output>;

    fn visit_conjunction(&mut self, children: Vec<Self::Output>) -> QueryResult<Self::Output>;
}

impl FilterSpec {
    pub fn accept<V: FilterVisitor + ?Sized>(&self, visitor: &mut V) -> QueryResult<V::Output> {
        match self {
            FilterSpec::Nullary(criterion) => visitor.visit_nullary(criterion),
            FilterSpec::Conjunction(children) => {
                let compiled = children
                    .iter()
                    .map(|child| child.accept(visitor))
                    .collect::<QueryResult<Vec<_>>>()?;
                visitor.visit_conjunction(compiled)
            }
            FilterSpec::Disjunction(children) => {
                let compiled = children
                    .iter()
                    .map(|child| child.accept(visitor))
                    .collect::<QueryResult<Vec<_>>>()?;
                visitor.visit_disjunction(compiled)
            }
            FilterSpec::Negation(child) => {
                let compiled = child.accept(visitor)?;
                visitor.visit_negation(compiled)
            }
        }
    }
}

impl OrderSpec {
    pub fn accept<V: OrderVisitor + ?Sized>(&self, visitor: &mut V) -> QueryResult<V::Output> {
        match self {
            OrderSpec::Nullary(key) => visitor.visit_nullary(key),
            OrderSpec::Conjunction(children) => {
                let compiled = children
                    .iter()
                    .map(|child| child.accept(visitor))
                    .collect::<QueryResult<Vec<_>>>()?;
                visitor.visit_conjunction(compiled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{asc, desc, eq, gt};

    /// Counts leaves and renders a prefix form.
    struct Prefix;

    impl FilterVisitor for Prefix {
        type Output = String;

        fn visit_nullary(&mut self, criterion: &Criterion) -> QueryResult<String> {
            Ok(criterion.path().to_string())
        }

        fn visit_conjunction(&mut self, children: Vec<String>) -> QueryResult<String> {
            Ok(format!("and({})", children.join(",")))
        }

        fn visit_disjunction(&mut self, children: Vec<String>) -> QueryResult<String> {
            Ok(format!("or({})", children.join(",")))
        }

        fn visit_negation(&mut self, child: String) -> QueryResult<String> {
            Ok(format!("not({child})"))
        }
    }

    impl OrderVisitor for Prefix {
        type Output = String;

        fn visit_nullary(&mut self, key: &OrderKey) -> QueryResult<String> {
            Ok(format!("{}:{}", key.path, key.direction.name()))
        }

        fn visit_conjunction(&mut self, children: Vec<String>) -> QueryResult<String> {
            Ok(children.join(" then "))
        }
    }

    #[test]
    fn filter_children_are_compiled_before_parents() {
        let spec = (eq("a", 1) | !gt("b", 2)) & eq("c", 3);
        assert_eq!(spec.accept(&mut Prefix).unwrap(), "and(or(a,not(b)),c)");
    }

    #[test]
    fn order_children_keep_their_sequence() {
        let spec = asc("a") & desc("b");
        assert_eq!(spec.accept(&mut Prefix).unwrap(), "a:asc then b:desc");
    }
}
