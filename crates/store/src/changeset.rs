//! The delta a session hands to its repository on commit.

use std::sync::RwLock;

use indexmap::IndexSet;
use quarry_core::{Entity, EntityType, Shared};

use crate::cache::{AnyCache, empty_cache};
use crate::error::{StoreError, StoreResult};
use crate::handle::AnyShared;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// One pending operation on one entity.
#[derive(Clone)]
pub struct Change {
    pub entity_type: EntityType,
    pub kind: ChangeKind,
    entity: AnyShared,
    new_cache: fn() -> Box<dyn AnyCache>,
}

impl Change {
    pub fn new<E: Entity>(kind: ChangeKind, entity: Shared<E>) -> Self {
        Self {
            entity_type: EntityType::of::<E>(),
            kind,
            entity,
            new_cache: empty_cache::<E>,
        }
    }

    pub(crate) fn erased(
        entity_type: EntityType,
        kind: ChangeKind,
        entity: AnyShared,
        new_cache: fn() -> Box<dyn AnyCache>,
    ) -> Self {
        Self {
            entity_type,
            kind,
            entity,
            new_cache,
        }
    }

    /// The changed entity, if it is an `E`.
    pub fn entity<E: Entity>(&self) -> StoreResult<Shared<E>> {
        self.entity
            .clone()
            .downcast::<RwLock<E>>()
            .map_err(|_| StoreError::WrongEntityType {
                expected: E::TYPE_NAME,
                found: self.entity_type.name.to_string(),
            })
    }

    /// Empty cache for the changed entity's type.
    pub fn new_cache(&self) -> Box<dyn AnyCache> {
        (self.new_cache)()
    }
}

impl core::fmt::Debug for Change {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Change")
            .field("entity_type", &self.entity_type.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered list of changes, applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: Vec<Change>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Entity types touched, in first-touched order.
    pub fn entity_types(&self) -> IndexSet<EntityType> {
        self.changes.iter().map(|c| c.entity_type).collect()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}
