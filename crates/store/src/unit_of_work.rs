//! Unit of Work: the per-session ledger of entity lifecycle states.
//!
//! States live in a side table keyed by handle identity, never on the
//! entity. A CLEAN entry carries a snapshot of the entity's state data;
//! reading its state compares the snapshot with the entity's current state,
//! so in-place edits show up as DIRTY without an explicit `mark_dirty`.
//!
//! Contract violations (registering twice, marking an untracked entity, a
//! transition outside the table below) are programming errors and panic.
//!
//! ```text
//! ∅ → NEW      ∅ → CLEAN
//! NEW → CLEAN  NEW → DELETED
//! CLEAN → DIRTY  CLEAN → DELETED
//! DIRTY → CLEAN  DIRTY → DELETED
//! ```

use std::any::Any;
use std::sync::RwLock;

use indexmap::IndexMap;
use quarry_core::{Entity, EntityType, Shared, StateData};

use crate::cache::{AnyCache, empty_cache};
use crate::changeset::{Change, ChangeKind, Changeset};
use crate::handle::{AnyShared, detached, identity, read};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityState {
    New,
    Clean,
    Dirty,
    Deleted,
}

impl EntityState {
    pub fn name(self) -> &'static str {
        match self {
            EntityState::New => "NEW",
            EntityState::Clean => "CLEAN",
            EntityState::Dirty => "DIRTY",
            EntityState::Deleted => "DELETED",
        }
    }

    /// Whether `from → to` is an allowed transition; `None` is untracked.
    pub fn allows(from: Option<EntityState>, to: EntityState) -> bool {
        use EntityState::*;
        matches!(
            (from, to),
            (None, New)
                | (None, Clean)
                | (Some(New), Clean)
                | (Some(New), Deleted)
                | (Some(Clean), Dirty)
                | (Some(Clean), Deleted)
                | (Some(Dirty), Clean)
                | (Some(Dirty), Deleted)
        )
    }
}

impl core::fmt::Display for EntityState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

type Capture = fn(&(dyn Any + Send + Sync)) -> Option<StateData>;

struct Entry {
    entity_type: EntityType,
    handle: AnyShared,
    state: EntityState,
    /// State the entity was registered with: `New` or `Clean`.
    origin: EntityState,
    snapshot: StateData,
    capture: Capture,
    new_cache: fn() -> Box<dyn AnyCache>,
}

impl Entry {
    fn current_state(&self) -> EntityState {
        match self.state {
            EntityState::Clean if (self.capture)(&*self.handle).as_ref() != Some(&self.snapshot) => {
                EntityState::Dirty
            }
            state => state,
        }
    }

    fn recapture(&mut self) {
        if let Some(snapshot) = (self.capture)(&*self.handle) {
            self.snapshot = snapshot;
        }
    }
}

fn capture<E: Entity>(handle: &(dyn Any + Send + Sync)) -> Option<StateData> {
    handle.downcast_ref::<RwLock<E>>().map(|e| read(e).state_data())
}

/// One tracked entity as yielded by [`UnitOfWork::iter`].
#[derive(Clone)]
pub struct TrackedEntity {
    pub entity_type: EntityType,
    pub entity: AnyShared,
    pub state: EntityState,
}

impl TrackedEntity {
    pub fn downcast<E: Entity>(&self) -> Option<Shared<E>> {
        self.entity.clone().downcast::<RwLock<E>>().ok()
    }
}

impl core::fmt::Debug for TrackedEntity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrackedEntity")
            .field("entity_type", &self.entity_type.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Tracked entities in registration order.
#[derive(Default)]
pub struct UnitOfWork {
    entries: IndexMap<usize, Entry>,
}

impl core::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork").field("tracked", &self.entries.len()).finish()
    }
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entity` as NEW.
    pub fn register_new<E: Entity>(&mut self, entity: &Shared<E>) {
        let snapshot = read(entity).state_data();
        self.insert(entity, EntityState::New, snapshot);
    }

    /// Track a working copy of `entity` as CLEAN and return the copy.
    ///
    /// `entity` itself is left untouched and untracked.
    pub fn register_clean<E: Entity>(&mut self, entity: &Shared<E>) -> Shared<E> {
        let copy = detached(entity);
        let snapshot = read(entity).state_data();
        self.insert(&copy, EntityState::Clean, snapshot);
        copy
    }

    /// Track `entity` as CLEAN against an existing snapshot.
    pub(crate) fn register_clean_with<E: Entity>(&mut self, entity: &Shared<E>, snapshot: StateData) {
        self.insert(entity, EntityState::Clean, snapshot);
    }

    pub fn unregister<E: Entity>(&mut self, entity: &Shared<E>) {
        if self.entries.shift_remove(&identity(entity)).is_none() {
            panic!("cannot unregister untracked {} entity", E::TYPE_NAME);
        }
    }

    /// Stop tracking `entity`, returning its origin and snapshot.
    pub(crate) fn release<E: Entity>(&mut self, entity: &Shared<E>) -> Option<(EntityState, StateData)> {
        self.entries
            .shift_remove(&identity(entity))
            .map(|entry| (entry.origin, entry.snapshot))
    }

    pub fn mark_clean<E: Entity>(&mut self, entity: &Shared<E>) {
        let entry = self.transition(entity, EntityState::Clean);
        entry.recapture();
    }

    pub fn mark_dirty<E: Entity>(&mut self, entity: &Shared<E>) {
        self.transition(entity, EntityState::Dirty);
    }

    pub fn mark_deleted<E: Entity>(&mut self, entity: &Shared<E>) {
        self.transition(entity, EntityState::Deleted);
    }

    /// Current state of `entity`, or `None` when it is not tracked.
    pub fn state<E: Entity>(&self, entity: &Shared<E>) -> Option<EntityState> {
        self.entries.get(&identity(entity)).map(Entry::current_state)
    }

    pub fn is_registered<E: Entity>(&self, entity: &Shared<E>) -> bool {
        self.entries.contains_key(&identity(entity))
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackedEntity> + '_ {
        self.entries.values().map(|entry| TrackedEntity {
            entity_type: entry.entity_type,
            entity: entry.handle.clone(),
            state: entry.current_state(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes a commit must apply.
    ///
    /// Entities registered NEW are added unless deleted again; entities
    /// registered CLEAN are updated when DIRTY and removed when DELETED.
    pub fn changeset(&self) -> Changeset {
        let mut changeset = Changeset::new();
        for entry in self.entries.values() {
            let kind = match (entry.origin, entry.current_state()) {
                (EntityState::New, EntityState::Deleted) => continue,
                (EntityState::New, _) => ChangeKind::Add,
                (_, EntityState::Dirty) => ChangeKind::Update,
                (_, EntityState::Deleted) => ChangeKind::Remove,
                _ => continue,
            };
            changeset.push(Change::erased(
                entry.entity_type,
                kind,
                entry.handle.clone(),
                entry.new_cache,
            ));
        }
        changeset
    }

    /// Forget every tracked entity.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    fn insert<E: Entity>(&mut self, entity: &Shared<E>, state: EntityState, snapshot: StateData) {
        let key = identity(entity);
        if self.entries.contains_key(&key) {
            panic!("{} entity is already registered", E::TYPE_NAME);
        }
        self.entries.insert(
            key,
            Entry {
                entity_type: EntityType::of::<E>(),
                handle: entity.clone(),
                state,
                origin: state,
                snapshot,
                capture: capture::<E>,
                new_cache: empty_cache::<E>,
            },
        );
    }

    fn transition<E: Entity>(&mut self, entity: &Shared<E>, to: EntityState) -> &mut Entry {
        let Some(entry) = self.entries.get_mut(&identity(entity)) else {
            panic!("cannot mark untracked {} entity {to}", E::TYPE_NAME);
        };
        let from = entry.current_state();
        if !EntityState::allows(Some(entry.state), to) && !EntityState::allows(Some(from), to) {
            panic!("invalid {} transition {from} -> {to}", E::TYPE_NAME);
        }
        entry.state = to;
        entry
    }
}
