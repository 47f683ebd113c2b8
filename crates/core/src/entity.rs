//! Entity contract: identity (surrogate id + slug) and by-name field access.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::id::EntityId;
use crate::meta::{Attribute, AttributeKind};
use crate::value::Value;

/// Shared, mutable handle to an entity.
///
/// Sessions and caches hand these out; mutating through the lock is how a
/// caller edits a tracked entity in place.
pub type Shared<E> = Arc<RwLock<E>>;

/// Type-erased handle to a related record, as produced by relation fields.
pub type RecordRef = Arc<dyn Record + Send + Sync>;

/// Wrap an entity in a [`Shared`] handle.
pub fn share<E>(entity: E) -> Shared<E> {
    Arc::new(RwLock::new(entity))
}

/// A field read from a record.
#[derive(Clone)]
pub enum Field {
    /// Terminal attribute value.
    Value(Value),
    /// To-one relation (absent when unset).
    One(Option<RecordRef>),
    /// To-many relation.
    Many(Vec<RecordRef>),
}

impl Field {
    pub fn to_one<E>(related: &Option<Shared<E>>) -> Self
    where
        E: Record + Send + Sync + 'static,
    {
        Field::One(related.as_ref().map(|r| r.clone() as RecordRef))
    }

    pub fn to_many<E>(related: &[Shared<E>]) -> Self
    where
        E: Record + Send + Sync + 'static,
    {
        Field::Many(related.iter().map(|r| r.clone() as RecordRef).collect())
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl core::fmt::Debug for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Field::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Field::One(r) => f.debug_tuple("One").field(&r.is_some()).finish(),
            Field::Many(rs) => f.debug_tuple("Many").field(&rs.len()).finish(),
        }
    }
}

/// By-name access to the declared attributes of a record.
///
/// Returns `None` for names the record does not declare.
pub trait Record {
    fn field(&self, name: &str) -> Option<Field>;
}

impl<R: Record + ?Sized> Record for RwLock<R> {
    fn field(&self, name: &str) -> Option<Field> {
        self.read().ok()?.field(name)
    }
}

/// Domain object managed by sessions, caches and repositories.
///
/// `ATTRIBUTES` is the static declaration consulted by the attribute
/// inspector; every declared attribute must be readable through
/// [`Record::field`].
pub trait Entity: Record + Clone + Send + Sync + 'static {
    /// Type name used in logs, errors and persisted file names.
    const TYPE_NAME: &'static str;

    /// Table backing this type in a relational store.
    const TABLE: &'static str = Self::TYPE_NAME;

    /// Column holding the surrogate id.
    const ID_COLUMN: &'static str = "id";

    const ATTRIBUTES: &'static [Attribute];

    /// Terminal attribute the slug is stored in, when it is stored at all.
    const SLUG_ATTRIBUTE: Option<&'static str> = None;

    fn id(&self) -> Option<EntityId>;

    fn set_id(&mut self, id: EntityId);

    /// Human-mnemonic identifier; may be derived from other fields and
    /// therefore only known after the entity is fully built.
    fn slug(&self) -> Option<String> {
        None
    }

    /// Externally visible state used for dirty detection.
    fn state_data(&self) -> StateData {
        StateData::capture(self, Self::ATTRIBUTES)
    }
}

/// Runtime descriptor of an entity type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntityType {
    pub type_id: TypeId,
    pub name: &'static str,
}

impl EntityType {
    pub fn of<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::TYPE_NAME,
        }
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name)
    }
}

/// One captured attribute in a [`StateData`] snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Scalar(Value),
    /// Id of the related record (`Null` when unset or not yet identified).
    Ref(Value),
    Refs(Vec<Value>),
}

/// Snapshot of an entity's declared attributes, compared by value.
///
/// Relations are captured by the related records' ids so that a snapshot
/// never holds on to other entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateData(BTreeMap<&'static str, StateValue>);

impl StateData {
    pub fn capture<R: Record + ?Sized>(record: &R, attributes: &[Attribute]) -> Self {
        let mut data = BTreeMap::new();
        for attr in attributes {
            let captured = match (attr.kind, record.field(attr.name)) {
                (AttributeKind::Terminal, Some(Field::Value(v))) => StateValue::Scalar(v),
                (AttributeKind::ToOne, Some(Field::One(r))) => {
                    StateValue::Ref(r.map_or(Value::Null, |r| related_id(r.as_ref())))
                }
                (AttributeKind::ToMany, Some(Field::Many(rs))) => {
                    StateValue::Refs(rs.iter().map(|r| related_id(r.as_ref())).collect())
                }
                _ => continue,
            };
            data.insert(attr.name, captured);
        }
        Self(data)
    }

    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn related_id(record: &(dyn Record + Send + Sync)) -> Value {
    record
        .field("id")
        .and_then(Field::into_value)
        .unwrap_or(Value::Null)
}
