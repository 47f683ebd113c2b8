//! Parsing, re-serialising and re-parsing CQL text yields the same
//! specification, and specifications built in code keep their meaning when
//! written out as CQL.

use proptest::prelude::*;
use quarry_core::testing::{Person, test_schema};
use quarry_core::{Shared, Value, share};
use quarry_query::spec::{self, FilterSpec};
use quarry_query::{QueryError, compile_filter, parse_filter, parse_order};

fn literal() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i64>().prop_map(|i| i.to_string()),
        (-1.0e6f64..1.0e6f64).prop_map(|f| format!("{f:?}")),
        "[a-zA-Z0-9 \"\\\\]{0,6}".prop_map(|s| {
            let escaped: String = s
                .chars()
                .flat_map(|c| match c {
                    '"' | '\\' => vec!['\\', c],
                    other => vec![other],
                })
                .collect();
            format!("\"{escaped}\"")
        }),
        Just("true".to_string()),
        Just("FALSE".to_string()),
        Just("\"2020-02-29T12:30:00Z\"".to_string()),
        Just("http://example.org/a".to_string()),
    ]
}

fn range() -> impl Strategy<Value = String> {
    (-50i64..50, -50i64..50).prop_map(|(low, high)| format!("{low}-{high}"))
}

fn path() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["age", "name", "first-name", "parent.name", "notes.text"])
}

fn criterion() -> impl Strategy<Value = String> {
    let scalar_ops = prop::sample::select(vec![
        "equal-to",
        "not-equal-to",
        "less-than",
        "less-than-or-equal-to",
        "greater-than",
        "greater-than-or-equal-to",
        "starts-with",
        "not-starts-with",
        "ends-with",
        "contains",
        "not-contains",
        "contained",
        "not-contained",
        "not-less-than",
    ]);
    let scalar = (path(), scalar_ops, prop::collection::vec(literal(), 0..4))
        .prop_map(|(path, op, values)| format!("{path}:{op}:{}", values.join(",")));
    let ranged = (
        path(),
        prop::sample::select(vec!["in-range", "not-in-range"]),
        prop::collection::vec(range(), 1..3),
    )
        .prop_map(|(path, op, values)| format!("{path}:{op}:{}", values.join(",")));
    prop_oneof![4 => scalar, 1 => ranged]
}

fn filter_text() -> impl Strategy<Value = String> {
    criterion().prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(|parts| parts.join("~")),
            prop::collection::vec(inner.clone(), 2..4).prop_map(|parts| parts.join(" and ")),
            prop::collection::vec(inner.clone(), 2..4).prop_map(|parts| parts.join(" or ")),
            inner.prop_map(|part| format!("({part})")),
        ]
    })
}

fn order_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        (path(), prop::sample::select(vec!["asc", "desc", "DESC"])),
        1..4,
    )
    .prop_map(|keys| {
        keys.into_iter()
            .map(|(path, dir)| format!("{path}:{dir}"))
            .collect::<Vec<_>>()
            .join("~")
    })
}

fn people() -> Vec<Shared<Person>> {
    vec![
        share(Person::new("Ann", 61).with_id(1).with_nickname("x")),
        share(Person::new("Bob", 3).with_id(2)),
        share(Person::new("ab", 0).with_id(3).with_nickname("ax")),
        share(Person::new("", 2).with_id(4)),
    ]
}

fn built_leaf() -> BoxedStrategy<FilterSpec> {
    let int = 0i64..4;
    let text = prop::sample::select(vec!["x", "a", "Ann", "b"]);
    let text_path = prop::sample::select(vec!["name", "nickname"]);
    prop_oneof![
        int.clone().prop_map(|v| spec::eq("age", v)),
        int.clone().prop_map(|v| spec::ne("age", v)),
        int.clone().prop_map(|v| spec::lt("age", v)),
        int.clone().prop_map(|v| spec::ge("age", v)),
        (int.clone(), int.clone()).prop_map(|(l, h)| spec::in_range("age", l, h)),
        prop::collection::btree_set(int.clone(), 0..3).prop_map(|vs| spec::contained("id", vs)),
        prop::collection::btree_set(int, 0..3).prop_map(|vs| spec::not_contained("id", vs)),
        (text_path.clone(), text.clone()).prop_map(|(p, v)| spec::eq(p, v)),
        (text_path.clone(), text.clone()).prop_map(|(p, v)| spec::ne(p, v)),
        (text_path.clone(), text.clone()).prop_map(|(p, v)| spec::starts_with(p, v)),
        (text_path.clone(), text.clone()).prop_map(|(p, v)| spec::contains(p, v)),
        (text_path.clone(), text).prop_map(|(p, v)| spec::not_contains(p, v)),
        text_path.clone().prop_map(|p| spec::eq(p, Value::Null)),
        text_path.prop_map(|p| spec::ne(p, Value::Null)),
    ]
    .boxed()
}

fn built_spec() -> impl Strategy<Value = FilterSpec> {
    let leaf = (built_leaf(), any::<bool>()).prop_map(|(leaf, negate)| if negate { !leaf } else { leaf });
    leaf.prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a & b),
            (inner.clone(), inner).prop_map(|(a, b)| a | b),
        ]
    })
}

fn selected(spec: &FilterSpec, people: &[Shared<Person>]) -> Vec<bool> {
    let predicate = compile_filter::<Person>(&test_schema(), spec).unwrap();
    people.iter().map(|p| predicate(&*p.read().unwrap())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn built_specs_keep_their_meaning_as_cql(spec in built_spec()) {
        let people = people();
        match spec.to_cql() {
            Ok(text) => {
                let reparsed = parse_filter(&text);
                prop_assert!(reparsed.is_ok(), "rendered text failed to parse: {text} -> {reparsed:?}");
                prop_assert_eq!(
                    selected(&reparsed.unwrap(), &people),
                    selected(&spec, &people),
                    "rendered as {}", text
                );
            }
            Err(err) => prop_assert!(matches!(err, QueryError::Unrepresentable(_)), "{err:?}"),
        }
    }

    #[test]
    fn filter_text_round_trips(text in filter_text()) {
        let parsed = parse_filter(&text);
        prop_assert!(parsed.is_ok(), "generated text failed to parse: {text} -> {parsed:?}");
        let parsed = parsed.unwrap();

        let rendered = parsed.to_cql().unwrap();
        let reparsed = parse_filter(&rendered).unwrap();
        prop_assert_eq!(reparsed, parsed, "rendered as {}", rendered);
    }

    #[test]
    fn order_text_round_trips(text in order_text()) {
        let parsed = parse_order(&text).unwrap();
        prop_assert_eq!(parse_order(&parsed.to_cql()).unwrap(), parsed);
    }
}

#[test]
fn scenario_value_list_with_two_numbers() {
    use quarry_query::cql::{FilterExpr, Literal, parse_filter_expr};
    use quarry_core::Value;

    let FilterExpr::Criterion(raw) = parse_filter_expr("age:equal-to:34,44").unwrap() else {
        panic!("expected a single criterion");
    };
    assert_eq!(raw.operator, "equal-to");
    assert_eq!(
        raw.values,
        vec![Literal::Value(Value::Int(34)), Literal::Value(Value::Int(44))]
    );
}

#[test]
fn negated_equality_is_not_written_as_not_equal_to() {
    let spec = !spec::eq("nickname", "x");
    let bob = people().swap_remove(1);
    assert!(selected(&spec, std::slice::from_ref(&bob))[0]);
    assert!(matches!(spec.to_cql(), Err(QueryError::Unrepresentable(_))));
}
