//! Entity caches.
//!
//! An [`EntityCache`] owns the list of live entities of one type. Its id and
//! slug indexes hold weak handles only, so an index entry can never keep an
//! entity alive once the list has let go of it. Slugs may be derived from
//! other fields after an entity was added; every `add` therefore marks the
//! indexes stale and the next lookup rebuilds them from the list.

use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use quarry_core::{Entity, EntityId, EntityType, Shared};

use crate::changeset::{Change, ChangeKind};
use crate::error::{StoreError, StoreResult};
use crate::handle::{detached, keys, read, write};

/// Cache of the live entities of type `E`.
pub struct EntityCache<E> {
    entities: Vec<Shared<E>>,
    by_id: HashMap<EntityId, Weak<RwLock<E>>>,
    by_slug: HashMap<String, Weak<RwLock<E>>>,
    stale: bool,
}

impl<E> Clone for EntityCache<E> {
    /// Shallow copy: both caches share the entity handles.
    fn clone(&self) -> Self {
        Self {
            entities: self.entities.clone(),
            by_id: self.by_id.clone(),
            by_slug: self.by_slug.clone(),
            stale: self.stale,
        }
    }
}

impl<E> Default for EntityCache<E> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            by_id: HashMap::new(),
            by_slug: HashMap::new(),
            stale: false,
        }
    }
}

impl<E> core::fmt::Debug for EntityCache<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntityCache")
            .field("len", &self.entities.len())
            .field("stale", &self.stale)
            .finish()
    }
}

impl<E: Entity> EntityCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from `entities`, rejecting duplicate ids and slugs.
    pub fn from_entities(entities: impl IntoIterator<Item = Shared<E>>) -> StoreResult<Self> {
        let mut cache = Self::new();
        for entity in entities {
            let (id, slug) = keys(&entity);
            if let Some(id) = id {
                match cache.by_id.entry(id) {
                    Entry::Occupied(_) => return Err(StoreError::duplicate_id(E::TYPE_NAME, id)),
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::downgrade(&entity));
                    }
                }
            }
            if let Some(slug) = slug {
                match cache.by_slug.entry(slug) {
                    Entry::Occupied(slot) => return Err(StoreError::duplicate_slug(E::TYPE_NAME, slot.key().clone())),
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::downgrade(&entity));
                    }
                }
            }
            cache.entities.push(entity);
        }
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in insertion order.
    pub fn entities(&self) -> &[Shared<E>] {
        &self.entities
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shared<E>> {
        self.entities.iter()
    }

    pub fn contains(&self, entity: &Shared<E>) -> bool {
        self.entities.iter().any(|e| Arc::ptr_eq(e, entity))
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Force the next lookup to rebuild the indexes.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Add `entity`.
    ///
    /// Adding an entity that is already cached is a no-op. Entities without
    /// an id or slug are accepted.
    pub fn add(&mut self, entity: Shared<E>) -> StoreResult<()> {
        self.refresh();
        if self.contains(&entity) {
            return Ok(());
        }
        let (id, slug) = keys(&entity);
        if let Some(id) = id {
            if self.by_id.get(&id).and_then(Weak::upgrade).is_some() {
                return Err(StoreError::duplicate_id(E::TYPE_NAME, id));
            }
        }
        if let Some(slug) = &slug {
            if self.by_slug.get(slug).and_then(Weak::upgrade).is_some() {
                return Err(StoreError::duplicate_slug(E::TYPE_NAME, slug.clone()));
            }
        }

        if let Some(id) = id {
            self.by_id.insert(id, Arc::downgrade(&entity));
        }
        if let Some(slug) = slug {
            self.by_slug.insert(slug, Arc::downgrade(&entity));
        }
        self.entities.push(entity);
        self.stale = true;
        Ok(())
    }

    /// Remove `entity`, matched by identity or else by id.
    ///
    /// Returns the handle that was cached.
    pub fn remove(&mut self, entity: &Shared<E>) -> StoreResult<Shared<E>> {
        let position = self.position(entity).ok_or_else(|| {
            let key = read(entity).id().map_or_else(|| "entity without id".to_string(), |id| id.to_string());
            StoreError::not_found(E::TYPE_NAME, key)
        })?;
        let removed = self.entities.remove(position);
        let gone = Arc::downgrade(&removed);
        self.by_id.retain(|_, w| !w.ptr_eq(&gone));
        self.by_slug.retain(|_, w| !w.ptr_eq(&gone));
        Ok(removed)
    }

    /// Swap in `entity` for the cached entity with the same id.
    ///
    /// Returns the handle that was replaced.
    pub fn replace(&mut self, entity: Shared<E>) -> StoreResult<Shared<E>> {
        self.refresh();
        let (id, slug) = keys(&entity);
        let id = id.ok_or_else(|| StoreError::not_found(E::TYPE_NAME, "entity without id"))?;
        let position = self
            .by_id
            .get(&id)
            .and_then(Weak::upgrade)
            .and_then(|current| self.entities.iter().position(|e| Arc::ptr_eq(e, &current)))
            .ok_or_else(|| StoreError::not_found(E::TYPE_NAME, id))?;

        if let Some(slug) = &slug {
            if let Some(holder) = self.by_slug.get(slug).and_then(Weak::upgrade) {
                if !Arc::ptr_eq(&holder, &self.entities[position]) && !Arc::ptr_eq(&holder, &entity) {
                    return Err(StoreError::duplicate_slug(E::TYPE_NAME, slug.clone()));
                }
            }
        }

        let replaced = core::mem::replace(&mut self.entities[position], entity.clone());
        let gone = Arc::downgrade(&replaced);
        self.by_slug.retain(|_, w| !w.ptr_eq(&gone));
        self.by_id.insert(id, Arc::downgrade(&entity));
        if let Some(slug) = slug {
            self.by_slug.insert(slug, Arc::downgrade(&entity));
        }
        Ok(replaced)
    }

    /// Swap in `entity` for the cached entity with the same id without
    /// checking its slug; the indexes are rebuilt on the next lookup.
    ///
    /// Used while staging a batch whose uniqueness is checked as a whole
    /// with [`EntityCache::check_unique`].
    pub(crate) fn swap_in(&mut self, entity: Shared<E>) -> StoreResult<Shared<E>> {
        let id = read(&entity)
            .id()
            .ok_or_else(|| StoreError::not_found(E::TYPE_NAME, "entity without id"))?;
        let position = self
            .entities
            .iter()
            .position(|e| read(e).id() == Some(id))
            .ok_or_else(|| StoreError::not_found(E::TYPE_NAME, id))?;
        let replaced = core::mem::replace(&mut self.entities[position], entity);
        self.stale = true;
        Ok(replaced)
    }

    /// Fail on the first id or slug held by two cached entities.
    pub fn check_unique(&self) -> StoreResult<()> {
        let mut ids = HashSet::new();
        let mut slugs = HashSet::new();
        for entity in &self.entities {
            let (id, slug) = keys(entity);
            if let Some(id) = id {
                if !ids.insert(id) {
                    return Err(StoreError::duplicate_id(E::TYPE_NAME, id));
                }
            }
            if let Some(slug) = slug {
                if !slugs.insert(slug.clone()) {
                    return Err(StoreError::duplicate_slug(E::TYPE_NAME, slug));
                }
            }
        }
        Ok(())
    }

    pub fn get_by_id(&mut self, id: EntityId) -> Option<Shared<E>> {
        self.refresh();
        self.by_id.get(&id).and_then(Weak::upgrade)
    }

    pub fn get_by_slug(&mut self, slug: &str) -> Option<Shared<E>> {
        self.refresh();
        self.by_slug.get(slug).and_then(Weak::upgrade)
    }

    /// Re-derive both indexes from the entity list.
    ///
    /// When two entities have come to share an id or slug, the first one
    /// added keeps the index entry.
    pub fn rebuild(&mut self) {
        self.by_id.clear();
        self.by_slug.clear();
        for entity in &self.entities {
            let (id, slug) = keys(entity);
            if let Some(id) = id {
                match self.by_id.entry(id) {
                    Entry::Occupied(_) => tracing::warn!(entity = E::TYPE_NAME, %id, "duplicate id while indexing"),
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::downgrade(entity));
                    }
                }
            }
            if let Some(slug) = slug {
                match self.by_slug.entry(slug) {
                    Entry::Occupied(slot) => {
                        tracing::warn!(entity = E::TYPE_NAME, slug = %slot.key(), "duplicate slug while indexing")
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::downgrade(entity));
                    }
                }
            }
        }
        self.stale = false;
    }

    /// Ids currently indexed, ascending.
    pub fn indexed_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Slugs currently indexed, ascending.
    pub fn indexed_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<_> = self.by_slug.keys().cloned().collect();
        slugs.sort();
        slugs
    }

    pub fn max_id(&self) -> Option<EntityId> {
        self.entities.iter().filter_map(|e| read(e).id()).max()
    }

    /// Give every entity without an id the next id from `next`.
    pub fn assign_missing_ids(&mut self, mut next: impl FnMut() -> StoreResult<EntityId>) -> StoreResult<usize> {
        let mut assigned = 0;
        for entity in &self.entities {
            let mut entity = write(entity);
            if entity.id().is_none() {
                entity.set_id(next()?);
                assigned += 1;
            }
        }
        if assigned > 0 {
            self.stale = true;
        }
        Ok(assigned)
    }

    fn refresh(&mut self) {
        if self.stale {
            self.rebuild();
        }
    }

    fn position(&self, entity: &Shared<E>) -> Option<usize> {
        if let Some(position) = self.entities.iter().position(|e| Arc::ptr_eq(e, entity)) {
            return Some(position);
        }
        let id = read(entity).id()?;
        self.entities.iter().position(|e| read(e).id() == Some(id))
    }
}

/// Type-erased view of an [`EntityCache`], as held by a [`CacheMap`].
pub trait AnyCache: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn len(&self) -> usize;

    fn max_id(&self) -> Option<EntityId>;

    fn clone_box(&self) -> Box<dyn AnyCache>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Apply one committed change. Added and updated entities are stored as
    /// detached copies, never as the caller's handle. Updates do not check
    /// slugs; call [`AnyCache::check_unique`] once the batch is applied.
    fn apply(&mut self, change: &Change) -> StoreResult<()>;

    fn assign_missing_ids(&mut self, next: &mut dyn FnMut() -> StoreResult<EntityId>) -> StoreResult<usize>;

    fn check_unique(&self) -> StoreResult<()>;

    fn rebuild(&mut self);
}

impl<E: Entity> AnyCache for EntityCache<E> {
    fn entity_type(&self) -> EntityType {
        EntityType::of::<E>()
    }

    fn len(&self) -> usize {
        self.entities.len()
    }

    fn max_id(&self) -> Option<EntityId> {
        EntityCache::max_id(self)
    }

    fn clone_box(&self) -> Box<dyn AnyCache> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&mut self, change: &Change) -> StoreResult<()> {
        let entity = change.entity::<E>()?;
        match change.kind {
            ChangeKind::Add => self.add(detached(&entity)),
            ChangeKind::Update => self.swap_in(detached(&entity)).map(drop),
            ChangeKind::Remove => self.remove(&entity).map(drop),
        }
    }

    fn assign_missing_ids(&mut self, next: &mut dyn FnMut() -> StoreResult<EntityId>) -> StoreResult<usize> {
        EntityCache::assign_missing_ids(self, next)
    }

    fn check_unique(&self) -> StoreResult<()> {
        EntityCache::check_unique(self)
    }

    fn rebuild(&mut self) {
        EntityCache::rebuild(self);
    }
}

/// Empty cache for `E`, boxed.
pub fn empty_cache<E: Entity>() -> Box<dyn AnyCache> {
    Box::new(EntityCache::<E>::new())
}

/// One cache per entity type.
#[derive(Default)]
pub struct CacheMap {
    caches: HashMap<TypeId, Box<dyn AnyCache>>,
}

impl Clone for CacheMap {
    fn clone(&self) -> Self {
        Self {
            caches: self.caches.iter().map(|(k, v)| (*k, v.clone_box())).collect(),
        }
    }
}

impl core::fmt::Debug for CacheMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map()
            .entries(self.caches.values().map(|c| (c.entity_type().name, c.len())))
            .finish()
    }
}

impl CacheMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.caches.contains_key(&type_id)
    }

    pub fn get<E: Entity>(&self) -> Option<&EntityCache<E>> {
        self.caches.get(&TypeId::of::<E>())?.as_any().downcast_ref()
    }

    pub fn get_mut<E: Entity>(&mut self) -> Option<&mut EntityCache<E>> {
        self.caches.get_mut(&TypeId::of::<E>())?.as_any_mut().downcast_mut()
    }

    pub fn insert<E: Entity>(&mut self, cache: EntityCache<E>) {
        self.caches.insert(TypeId::of::<E>(), Box::new(cache));
    }

    pub fn get_erased(&self, type_id: TypeId) -> Option<&dyn AnyCache> {
        self.caches.get(&type_id).map(|c| &**c)
    }

    pub fn get_erased_mut(&mut self, type_id: TypeId) -> Option<&mut Box<dyn AnyCache>> {
        self.caches.get_mut(&type_id)
    }

    pub fn insert_erased(&mut self, cache: Box<dyn AnyCache>) {
        self.caches.insert(cache.entity_type().type_id, cache);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Box<dyn AnyCache>> {
        self.caches.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn AnyCache>> {
        self.caches.values_mut()
    }

    pub fn into_caches(self) -> impl Iterator<Item = Box<dyn AnyCache>> {
        self.caches.into_values()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn clear(&mut self) {
        self.caches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::share;
    use quarry_core::testing::{Person, Tag};

    #[test]
    fn lookups_by_id_and_slug() {
        let mut cache = EntityCache::new();
        let ann = share(Person::new("Ann", 61).with_id(1).with_nickname("annie"));
        cache.add(ann.clone()).unwrap();

        assert!(Arc::ptr_eq(&cache.get_by_id(EntityId::new(1)).unwrap(), &ann));
        assert!(Arc::ptr_eq(&cache.get_by_slug("annie").unwrap(), &ann));
        assert!(cache.get_by_id(EntityId::new(2)).is_none());
    }

    #[test]
    fn adding_the_same_handle_twice_is_a_no_op() {
        let mut cache = EntityCache::new();
        let tag = share(Tag::new("red", 1.0));
        cache.add(tag.clone()).unwrap();
        cache.add(tag).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn duplicate_slug_is_rejected() {
        let mut cache = EntityCache::new();
        cache.add(share(Tag::new("red", 1.0))).unwrap();
        let err = cache.add(share(Tag::new("red", 2.0))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSlug { slug, .. } if slug == "red"));
    }

    #[test]
    fn remove_matches_by_id_when_handles_differ() {
        let mut cache = EntityCache::new();
        let cached = share(Person::new("Ann", 61).with_id(1));
        cache.add(cached.clone()).unwrap();

        let copy = detached(&cached);
        let removed = cache.remove(&copy).unwrap();
        assert!(Arc::ptr_eq(&removed, &cached));
        assert!(cache.get_by_id(EntityId::new(1)).is_none());
        assert!(matches!(cache.remove(&copy), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn replace_swaps_entity_and_slug() {
        let mut cache = EntityCache::new();
        cache.add(share(Person::new("Ann", 61).with_id(1).with_nickname("annie"))).unwrap();

        let renamed = share(Person::new("Ann", 62).with_id(1).with_nickname("ann"));
        let old = cache.replace(renamed.clone()).unwrap();
        assert_eq!(read(&old).age, 61);
        assert!(cache.get_by_slug("annie").is_none());
        assert!(Arc::ptr_eq(&cache.get_by_slug("ann").unwrap(), &renamed));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn replace_requires_a_known_id() {
        let mut cache: EntityCache<Person> = EntityCache::new();
        assert!(matches!(
            cache.replace(share(Person::new("Ann", 61))),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            cache.replace(share(Person::new("Ann", 61).with_id(9))),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn replace_rejects_slug_held_by_another_entity() {
        let mut cache = EntityCache::new();
        cache.add(share(Person::new("Ann", 61).with_id(1).with_nickname("annie"))).unwrap();
        cache.add(share(Person::new("Bob", 30).with_id(2).with_nickname("bob"))).unwrap();

        let err = cache
            .replace(share(Person::new("Bob", 30).with_id(2).with_nickname("annie")))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSlug { .. }));
    }

    #[test]
    fn index_entries_do_not_keep_entities_alive() {
        let mut cache = EntityCache::new();
        let tag = share(Tag::new("red", 1.0));
        cache.add(tag.clone()).unwrap();
        let weak = Arc::downgrade(&tag);
        cache.remove(&tag).unwrap();
        drop(tag);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn from_entities_rejects_duplicates() {
        let err = EntityCache::from_entities([
            share(Person::new("Ann", 61).with_id(1)),
            share(Person::new("Bob", 30).with_id(1)),
        ])
        .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }

    #[test]
    fn missing_ids_are_assigned_in_order() {
        let mut cache = EntityCache::new();
        cache.add(share(Tag::new("a", 1.0))).unwrap();
        cache.add(share(Tag::new("b", 1.0))).unwrap();
        let mut last = 10;
        let assigned = cache
            .assign_missing_ids(|| {
                last += 1;
                Ok(EntityId::new(last))
            })
            .unwrap();
        assert_eq!(assigned, 2);
        assert_eq!(cache.get_by_id(EntityId::new(12)).map(|t| read(&t).name.clone()), Some("b".to_string()));
        assert_eq!(cache.max_id(), Some(EntityId::new(12)));
    }

    #[test]
    fn erased_apply_stores_detached_copies() {
        let mut map = CacheMap::new();
        map.insert(EntityCache::<Tag>::new());
        let tag = share(Tag { id: Some(EntityId::new(1)), ..Tag::new("red", 1.0) });

        let cache = map.get_erased_mut(TypeId::of::<Tag>()).unwrap();
        cache.apply(&Change::new(ChangeKind::Add, tag.clone())).unwrap();

        let stored = map.get_mut::<Tag>().unwrap().get_by_id(EntityId::new(1)).unwrap();
        assert!(!Arc::ptr_eq(&stored, &tag));
        assert_eq!(*read(&stored), *read(&tag));
    }

    #[test]
    fn erased_apply_rejects_other_types() {
        let mut map = CacheMap::new();
        map.insert(EntityCache::<Tag>::new());
        let cache = map.get_erased_mut(TypeId::of::<Tag>()).unwrap();
        let err = cache
            .apply(&Change::new(ChangeKind::Add, share(Person::new("Ann", 61))))
            .unwrap_err();
        assert!(matches!(err, StoreError::WrongEntityType { expected: "tag", .. }));
    }

    #[test]
    fn batch_swaps_are_checked_once_at_the_end() {
        let red = Tag { id: Some(EntityId::new(1)), ..Tag::new("red", 1.0) };
        let blue = Tag { id: Some(EntityId::new(2)), ..Tag::new("blue", 1.0) };
        let mut cache = EntityCache::from_entities([share(red.clone()), share(blue.clone())]).unwrap();

        cache.swap_in(share(Tag { name: "blue".into(), ..red })).unwrap();
        assert!(matches!(cache.check_unique(), Err(StoreError::DuplicateSlug { .. })));

        cache.swap_in(share(Tag { name: "red".into(), ..blue })).unwrap();
        cache.check_unique().unwrap();
        assert_eq!(read(&cache.get_by_slug("red").unwrap()).id, Some(EntityId::new(2)));
    }
}
