//! In-process evaluation backend.
//!
//! Filters compile to predicates over [`Record`]s and orders to comparators.
//! Relation hops are followed through [`Field::One`] / [`Field::Many`]; a
//! to-many hop matches when any related record matches. A relation as the
//! last path segment compares the related record's id.
//!
//! `Null` satisfies only `equal-to null`; every other comparison with a
//! missing value fails, including the negative operators.

use core::cmp::Ordering;
use std::any::TypeId;

use quarry_core::{Entity, Field, Record, Schema, Value};

use crate::error::QueryResult;
use crate::resolve;
use crate::spec::{Criterion, Direction, FilterOperator, FilterSpec, Operand, OrderKey, OrderSpec};
use crate::visitor::{FilterVisitor, OrderVisitor};

/// Compiled filter.
pub type Predicate = Box<dyn Fn(&dyn Record) -> bool + Send + Sync>;

/// Compiled order.
pub type Comparator = Box<dyn Fn(&dyn Record, &dyn Record) -> Ordering + Send + Sync>;

type ValueTest = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Compiles filter specifications for the entity type `root`.
pub struct EvalFilterVisitor<'s> {
    schema: &'s Schema,
    root: TypeId,
}

impl<'s> EvalFilterVisitor<'s> {
    pub fn new(schema: &'s Schema, root: TypeId) -> Self {
        Self { schema, root }
    }
}

impl FilterVisitor for EvalFilterVisitor<'_> {
    type Output = Predicate;

    fn visit_nullary(&mut self, criterion: &Criterion) -> QueryResult<Predicate> {
        let steps = resolve::criterion(self.schema, self.root, criterion)?;
        let path: Vec<&'static str> = steps.iter().map(|s| s.attribute.name).collect();
        let test = value_test(criterion.operator(), criterion.operand().clone());
        Ok(Box::new(move |record| any_value(record, &path, &test)))
    }

    fn visit_conjunction(&mut self, children: Vec<Predicate>) -> QueryResult<Predicate> {
        Ok(Box::new(move |record| children.iter().all(|p| p(record))))
    }

    fn visit_disjunction(&mut self, children: Vec<Predicate>) -> QueryResult<Predicate> {
        Ok(Box::new(move |record| children.iter().any(|p| p(record))))
    }

    fn visit_negation(&mut self, child: Predicate) -> QueryResult<Predicate> {
        Ok(Box::new(move |record| !child(record)))
    }
}

/// Compiles order specifications for the entity type `root`.
pub struct EvalOrderVisitor<'s> {
    schema: &'s Schema,
    root: TypeId,
}

impl<'s> EvalOrderVisitor<'s> {
    pub fn new(schema: &'s Schema, root: TypeId) -> Self {
        Self { schema, root }
    }
}

impl OrderVisitor for EvalOrderVisitor<'_> {
    type Output = Comparator;

    fn visit_nullary(&mut self, key: &OrderKey) -> QueryResult<Comparator> {
        let steps = resolve::order_key(self.schema, self.root, key)?;
        let path: Vec<&'static str> = steps.iter().map(|s| s.attribute.name).collect();
        let direction = key.direction;
        Ok(Box::new(move |a, b| {
            let ordering = sort_key(a, &path).order_cmp(&sort_key(b, &path));
            match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        }))
    }

    fn visit_conjunction(&mut self, children: Vec<Comparator>) -> QueryResult<Comparator> {
        Ok(Box::new(move |a, b| {
            children
                .iter()
                .map(|cmp| cmp(a, b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }))
    }
}

/// Compile `spec` into a predicate over entities of type `E`.
pub fn compile_filter<E: Entity>(schema: &Schema, spec: &FilterSpec) -> QueryResult<Predicate> {
    spec.accept(&mut EvalFilterVisitor::new(schema, TypeId::of::<E>()))
}

/// Compile `spec` into a comparator over entities of type `E`.
pub fn compile_order<E: Entity>(schema: &Schema, spec: &OrderSpec) -> QueryResult<Comparator> {
    spec.accept(&mut EvalOrderVisitor::new(schema, TypeId::of::<E>()))
}

fn value_test(operator: FilterOperator, operand: Operand) -> ValueTest {
    use FilterOperator as Op;

    match (operator, operand) {
        (Op::EqualTo, Operand::Single(Value::Null)) => Box::new(Value::is_null),
        (Op::NotEqualTo, Operand::Single(Value::Null)) => Box::new(|x| !x.is_null()),
        (Op::EqualTo, Operand::Single(v)) => Box::new(move |x| x.matches(&v)),
        (Op::NotEqualTo, Operand::Single(v)) => Box::new(move |x| !x.is_null() && !x.matches(&v)),
        (Op::LessThan, Operand::Single(v)) => Box::new(move |x| x.compare(&v) == Some(Ordering::Less)),
        (Op::LessThanOrEqualTo, Operand::Single(v)) => {
            Box::new(move |x| matches!(x.compare(&v), Some(Ordering::Less | Ordering::Equal)))
        }
        (Op::GreaterThan, Operand::Single(v)) => Box::new(move |x| x.compare(&v) == Some(Ordering::Greater)),
        (Op::GreaterThanOrEqualTo, Operand::Single(v)) => {
            Box::new(move |x| matches!(x.compare(&v), Some(Ordering::Greater | Ordering::Equal)))
        }
        (Op::InRange, Operand::Range(low, high)) => Box::new(move |x| {
            matches!(x.compare(&low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(x.compare(&high), Some(Ordering::Less | Ordering::Equal))
        }),
        (Op::StartsWith, Operand::Single(v)) => text_test(v, |x, needle| x.starts_with(needle)),
        (Op::EndsWith, Operand::Single(v)) => text_test(v, |x, needle| x.ends_with(needle)),
        (Op::Contains, Operand::Single(v)) => text_test(v, |x, needle| x.contains(needle)),
        (Op::NotContains, Operand::Single(v)) => text_test(v, |x, needle| !x.contains(needle)),
        (Op::Contained, Operand::List(vs)) => Box::new(move |x| vs.iter().any(|v| x.matches(v))),
        (Op::NotContained, Operand::List(vs)) => {
            Box::new(move |x| !x.is_null() && !vs.iter().any(|v| x.matches(v)))
        }
        // Criterion::new rules out any other pairing.
        _ => Box::new(|_| false),
    }
}

fn text_test(needle: Value, test: fn(&str, &str) -> bool) -> ValueTest {
    Box::new(move |x| match (x.as_str(), needle.as_str()) {
        (Some(x), Some(needle)) => test(x, needle),
        _ => false,
    })
}

/// Whether any value reachable through `path` passes `test`.
fn any_value(record: &dyn Record, path: &[&str], test: &ValueTest) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    match record.field(head) {
        Some(Field::Value(v)) => rest.is_empty() && test(&v),
        Some(Field::One(None)) => rest.is_empty() && test(&Value::Null),
        Some(Field::One(Some(related))) => {
            if rest.is_empty() {
                test(&record_id(related.as_ref()))
            } else {
                any_value(related.as_ref(), rest, test)
            }
        }
        Some(Field::Many(related)) => related.iter().any(|r| {
            if rest.is_empty() {
                test(&record_id(r.as_ref()))
            } else {
                any_value(r.as_ref(), rest, test)
            }
        }),
        None => false,
    }
}

/// Value of a to-one path used as a sort key; `Null` where the path breaks.
fn sort_key(record: &dyn Record, path: &[&str]) -> Value {
    let Some((head, rest)) = path.split_first() else {
        return Value::Null;
    };
    match record.field(head) {
        Some(Field::Value(v)) if rest.is_empty() => v,
        Some(Field::One(Some(related))) => {
            if rest.is_empty() {
                record_id(related.as_ref())
            } else {
                sort_key(related.as_ref(), rest)
            }
        }
        _ => Value::Null,
    }
}

fn record_id(record: &(dyn Record + Send + Sync)) -> Value {
    record
        .field("id")
        .and_then(Field::into_value)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::share;
    use quarry_core::testing::{Note, Person, test_schema};

    use crate::cql::{parse_filter, parse_order};
    use crate::error::QueryError;
    use crate::spec::{asc, desc, eq, ne};

    fn people() -> Vec<Person> {
        let ann = share(Person::new("Ann", 61).with_id(1));
        let mut bob = Person::new("Bob", 30).with_id(2).with_parent(&ann);
        bob.notes.push(share(Note::new("likes tea").with_id(10)));
        bob.notes.push(share(Note::new("owns a cat").with_id(11)));
        let cid = Person::new("Cid", 30).with_id(3).with_nickname("cee").with_parent(&ann);
        let ann = ann.read().map(|p| p.clone()).unwrap();
        vec![ann, bob, cid]
    }

    fn matching(cql: &str) -> Vec<i64> {
        let schema = test_schema();
        let pred = compile_filter::<Person>(&schema, &parse_filter(cql).unwrap()).unwrap();
        people()
            .iter()
            .filter(|p| pred(*p))
            .filter_map(|p| p.id.map(|id| id.get()))
            .collect()
    }

    #[test]
    fn terminal_operators() {
        assert_eq!(matching("age:equal-to:30"), vec![2, 3]);
        assert_eq!(matching("age:in-range:30-61"), vec![1, 2, 3]);
        assert_eq!(matching("name:starts-with:\"A\" or name:ends-with:\"d\""), vec![1, 3]);
        assert_eq!(matching("age:less-than:61~name:not-equal-to:\"Bob\""), vec![3]);
    }

    #[test]
    fn relation_hops() {
        assert_eq!(matching("parent.name:equal-to:\"Ann\""), vec![2, 3]);
        assert_eq!(matching("notes.text:contains:\"cat\""), vec![2]);
        assert_eq!(matching("parent:equal-to:1"), vec![2, 3]);
        assert_eq!(matching("notes:contained:11,12"), vec![2]);
        assert_eq!(matching("parent:equal-to:null"), vec![1]);
    }

    #[test]
    fn null_values_fail_negative_operators() {
        assert_eq!(matching("nickname:not-equal-to:\"x\""), vec![3]);
        assert_eq!(matching("nickname:not-contains:\"x\""), vec![3]);
        assert_eq!(matching("nickname:equal-to:null"), vec![1, 2]);
    }

    #[test]
    fn to_many_hops_match_when_any_related_record_does() {
        assert_eq!(matching("notes.text:not-contains:\"cat\""), vec![2]);
        assert_eq!(matching("notes.text:starts-with:\"owns\"~notes.text:starts-with:\"likes\""), vec![2]);
        assert!(matching("notes.text:equal-to:null").is_empty());
    }

    #[test]
    fn empty_membership() {
        assert!(matching("id:contained:").is_empty());
        assert_eq!(matching("id:not-contained:"), vec![1, 2, 3]);
        assert_eq!(matching("nickname:not-contained:"), vec![3]);
    }

    #[test]
    fn negation_and_builders() {
        let schema = test_schema();
        let pred = compile_filter::<Person>(&schema, &!(eq("age", 30) & ne("name", "Bob"))).unwrap();
        let ids: Vec<_> = people().iter().filter(|p| pred(*p)).map(|p| p.name.clone()).collect();
        assert_eq!(ids, vec!["Ann", "Bob"]);
    }

    #[test]
    fn ordering_with_tie_breaks() {
        let schema = test_schema();
        let cmp = compile_order::<Person>(&schema, &parse_order("age:asc~name:desc").unwrap()).unwrap();
        let mut people = people();
        people.sort_by(|a, b| cmp(a, b));
        let names: Vec<_> = people.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Cid", "Bob", "Ann"]);
    }

    #[test]
    fn nulls_sort_first_ascending() {
        let schema = test_schema();
        let cmp = compile_order::<Person>(&schema, &(asc("parent.name") & desc("id"))).unwrap();
        let mut people = people();
        people.sort_by(|a, b| cmp(a, b));
        let ids: Vec<_> = people.iter().filter_map(|p| p.id).map(|id| id.get()).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn compile_errors_surface_before_evaluation() {
        let schema = test_schema();
        let err = compile_filter::<Person>(&schema, &parse_filter("name:greater-than:1").unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, QueryError::InvalidOperand(_)));
        let err = compile_order::<Person>(&schema, &asc("notes.text")).err().unwrap();
        assert!(matches!(err, QueryError::InvalidOperand(_)));
    }
}
