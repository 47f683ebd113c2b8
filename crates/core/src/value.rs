//! Attribute values: the scalar vocabulary shared by entities and queries.
//!
//! A `Value` is compared by value, never by identity. Query backends use the
//! comparison helpers here so that in-process evaluation and the relational
//! renderer agree on what "equal" and "less than" mean.

use core::cmp::Ordering;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EntityId;

/// A terminal attribute value or a query literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<FixedOffset>),
    Url(String),
}

/// Declared type of a terminal attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
    Timestamp,
    Url,
}

impl ValueKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Float)
    }

    pub fn is_textual(self) -> bool {
        matches!(self, ValueKind::String | ValueKind::Url)
    }

    /// Kinds with a total, meaningful order (usable with `<`, `>` and ranges).
    pub fn is_ordered(self) -> bool {
        self.is_numeric() || self.is_textual() || self == ValueKind::Timestamp
    }

    /// Whether a literal of the given value may be compared against an
    /// attribute of this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match value.kind() {
            None => true,
            Some(other) if self == other => true,
            Some(other) => {
                (self.is_numeric() && other.is_numeric()) || (self.is_textual() && other.is_textual())
            }
        }
    }
}

impl core::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Url => "url",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::String(_) => Some(ValueKind::String),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
            Value::Url(_) => Some(ValueKind::Url),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text content of string and URL values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Url(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two values of compatible kinds.
    ///
    /// Returns `None` when either side is `Null` or the kinds are not
    /// comparable; callers treat that as "criterion not satisfied".
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (a, b) if a.as_str().is_some() && b.as_str().is_some() => {
                Some(a.as_str()?.cmp(b.as_str()?))
            }
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Value equality with numeric and textual widening (`1 == 1.0`).
    pub fn matches(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order used for sort keys: `Null` sorts first, incomparable
    /// kinds fall back to a fixed kind rank.
    pub fn order_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (a, b) => a
                .compare(b)
                .unwrap_or_else(|| a.kind_rank().cmp(&b.kind_rank())),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) | Value::Url(_) => 3,
            Value::Timestamp(_) => 4,
        }
    }
}

impl core::fmt::Display for Value {
    /// Literal form, as accepted by the CQL parser.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            // Debug keeps a decimal point or exponent so the literal re-parses as a float.
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) | Value::Url(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
            Value::Timestamp(t) => write!(f, "\"{}\"", t.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value.fixed_offset())
    }
}

impl From<EntityId> for Value {
    fn from(value: EntityId) -> Self {
        Value::Int(value.get())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_compare_across_int_and_float() {
        assert!(Value::Int(1).matches(&Value::Float(1.0)));
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
    }

    #[test]
    fn null_never_compares() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert!(!Value::Null.matches(&Value::Null));
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(Value::Null.order_cmp(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Int(3).order_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn string_and_url_are_textual_peers() {
        let url = Value::Url("http://example.org/a".to_string());
        assert!(url.matches(&Value::from("http://example.org/a")));
        assert!(ValueKind::String.accepts(&url));
        assert!(!ValueKind::Int.accepts(&url));
    }

    #[test]
    fn float_literal_keeps_decimal_point() {
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::from("a\"b").to_string(), "\"a\\\"b\"");
    }
}
