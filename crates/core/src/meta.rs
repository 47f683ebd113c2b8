//! Attribute metadata and the per-type schema table.
//!
//! Entities declare their attributes statically (`Entity::ATTRIBUTES`). A
//! [`Schema`] indexes those declarations by type once at startup so that the
//! inspector and query compilers can walk relation paths across types without
//! any reflection.

use std::any::TypeId;
use std::collections::HashMap;

use crate::entity::{Entity, EntityType};
use crate::error::{CoreError, CoreResult};
use crate::value::ValueKind;

/// Kind of an entity attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// Plain value; cannot be traversed further.
    Terminal,
    /// Reference to a single related entity.
    ToOne,
    /// Collection of related entities.
    ToMany,
}

/// Static declaration of one entity attribute.
#[derive(Debug, Copy, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub kind: AttributeKind,
    /// Column on the owning table (foreign key column for to-one relations).
    pub column: &'static str,
    /// Declared value type of a terminal attribute.
    pub value_kind: Option<ValueKind>,
    /// Related entity type for relations.
    pub target: Option<fn() -> TypeId>,
    /// Foreign key column on the related table for to-many relations.
    pub remote_column: Option<&'static str>,
}

impl Attribute {
    pub const fn terminal(name: &'static str, value_kind: ValueKind) -> Self {
        Self {
            name,
            kind: AttributeKind::Terminal,
            column: name,
            value_kind: Some(value_kind),
            target: None,
            remote_column: None,
        }
    }

    pub const fn to_one(name: &'static str, column: &'static str, target: fn() -> TypeId) -> Self {
        Self {
            name,
            kind: AttributeKind::ToOne,
            column,
            value_kind: None,
            target: Some(target),
            remote_column: None,
        }
    }

    pub const fn to_many(
        name: &'static str,
        remote_column: &'static str,
        target: fn() -> TypeId,
    ) -> Self {
        Self {
            name,
            kind: AttributeKind::ToMany,
            column: name,
            value_kind: None,
            target: Some(target),
            remote_column: Some(remote_column),
        }
    }

    /// Override the column name (defaults to the attribute name).
    pub const fn with_column(self, column: &'static str) -> Self {
        Self { column, ..self }
    }

    pub fn target_type(&self) -> Option<TypeId> {
        self.target.map(|f| f())
    }

    pub fn is_relation(&self) -> bool {
        self.kind != AttributeKind::Terminal
    }
}

/// Registered description of an entity type.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub entity_type: EntityType,
    pub table: &'static str,
    pub id_column: &'static str,
    pub attributes: &'static [Attribute],
}

impl EntityMeta {
    pub fn of<E: Entity>() -> Self {
        Self {
            entity_type: EntityType::of::<E>(),
            table: E::TABLE,
            id_column: E::ID_COLUMN,
            attributes: E::ATTRIBUTES,
        }
    }

    pub fn name(&self) -> &'static str {
        self.entity_type.name
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Type-indexed table of entity metadata.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<TypeId, EntityMeta>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with<E: Entity>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn register<E: Entity>(&mut self) -> &mut Self {
        let meta = EntityMeta::of::<E>();
        tracing::debug!(entity = meta.name(), table = meta.table, "registered entity type");
        self.types.insert(TypeId::of::<E>(), meta);
        self
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    pub fn meta(&self, type_id: TypeId) -> CoreResult<&EntityMeta> {
        self.types
            .get(&type_id)
            .ok_or_else(|| CoreError::unknown_type(format!("{type_id:?}")))
    }

    pub fn meta_of<E: Entity>(&self) -> CoreResult<&EntityMeta> {
        self.types
            .get(&TypeId::of::<E>())
            .ok_or_else(|| CoreError::unknown_type(E::TYPE_NAME))
    }

    /// Metadata of the type a relation attribute points at.
    pub fn target_of(&self, attribute: &Attribute) -> CoreResult<&EntityMeta> {
        let target = attribute.target_type().ok_or_else(|| {
            CoreError::validation(format!("attribute `{}` is not a relation", attribute.name))
        })?;
        self.meta(target)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
