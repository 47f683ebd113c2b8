use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use quarry_core::{Entity, EntityId, EntityType, Shared, share};
use tracing::instrument;

use crate::cache::{AnyCache, CacheMap, EntityCache};
use crate::changeset::Changeset;
use crate::config::RepositoryConfig;
use crate::error::{StoreError, StoreResult};

use super::Repository;

type CacheLoader = Arc<dyn Fn() -> StoreResult<Box<dyn AnyCache>> + Send + Sync>;

#[derive(Default)]
struct RepositoryState {
    caches: CacheMap,
    last_ids: HashMap<TypeId, EntityId>,
}

impl RepositoryState {
    fn next_id(&mut self, entity_type: EntityType) -> StoreResult<EntityId> {
        let type_id = entity_type.type_id;
        let cached = self.caches.get_erased(type_id).and_then(|c| c.max_id());
        let mut last = self.last_ids.get(&type_id).copied().max(cached).unwrap_or(EntityId::new(0));
        let id = advance(&mut last, entity_type.name)?;
        self.last_ids.insert(type_id, id);
        Ok(id)
    }
}

/// Step `last` to the next id of its sequence.
fn advance(last: &mut EntityId, entity: &'static str) -> StoreResult<EntityId> {
    *last = last.checked_next().ok_or_else(|| StoreError::ids_exhausted(entity))?;
    Ok(*last)
}

/// In-memory repository.
///
/// Types are loaded lazily, either empty or through a loader registered
/// with [`MemoryRepository::with_loader`]. Loaded entities without an id are
/// numbered on load.
pub struct MemoryRepository {
    config: RepositoryConfig,
    state: Mutex<RepositoryState>,
    loaders: HashMap<TypeId, CacheLoader>,
}

impl core::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("config", &self.config)
            .field("loaders", &self.loaders.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(RepositoryConfig::default())
    }
}

impl MemoryRepository {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RepositoryState::default()),
            loaders: HashMap::new(),
        }
    }

    /// Populate `E` from `loader` on first access.
    pub fn with_loader<E, F>(mut self, loader: F) -> Self
    where
        E: Entity,
        F: Fn() -> StoreResult<Vec<E>> + Send + Sync + 'static,
    {
        let loader: CacheLoader = Arc::new(move || {
            let cache = EntityCache::from_entities(loader()?.into_iter().map(share))?;
            Ok(Box::new(cache) as Box<dyn AnyCache>)
        });
        self.loaders.insert(TypeId::of::<E>(), loader);
        self
    }

    /// Seed `E` with `entities` as if they had been loaded.
    pub fn with_entities<E: Entity>(self, entities: Vec<E>) -> Self {
        self.with_loader(move || Ok(entities.clone()))
    }

    /// Number of entities of type `E` currently held.
    pub fn len<E: Entity>(&self) -> StoreResult<usize> {
        Ok(self.load::<E>()?.len())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, RepositoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("repository state"))
    }

    fn ensure_loaded(
        &self,
        state: &mut RepositoryState,
        entity_type: EntityType,
        empty: impl FnOnce() -> Box<dyn AnyCache>,
    ) -> StoreResult<()> {
        if state.caches.contains(entity_type.type_id) {
            return Ok(());
        }

        let mut cache = match self.loaders.get(&entity_type.type_id) {
            Some(loader) => loader()?,
            None => empty(),
        };
        let mut last = cache.max_id().unwrap_or(EntityId::new(0));
        let numbered = cache.assign_missing_ids(&mut || advance(&mut last, entity_type.name))?;
        cache.rebuild();

        tracing::debug!(
            repository = %self.config.name,
            entity = entity_type.name,
            loaded = cache.len(),
            numbered,
            "entity type loaded"
        );
        state.last_ids.insert(entity_type.type_id, last);
        state.caches.insert_erased(cache);
        Ok(())
    }

    /// Apply `changeset` against copies of the touched caches and swap them
    /// in once every change succeeded.
    ///
    /// Ids and slugs must be unique once the whole changeset is applied, so
    /// one changeset may swap the slugs of two entities.
    ///
    /// Returns copies of the touched caches as committed.
    #[instrument(skip(self, changeset), fields(repository = %self.config.name, changes = changeset.len()))]
    pub(crate) fn apply(&self, changeset: &Changeset) -> StoreResult<Vec<Box<dyn AnyCache>>> {
        let mut state = self.lock()?;
        let mut staged: indexmap::IndexMap<TypeId, Box<dyn AnyCache>> = indexmap::IndexMap::new();

        for change in changeset.iter() {
            let type_id = change.entity_type.type_id;
            if !staged.contains_key(&type_id) {
                self.ensure_loaded(&mut state, change.entity_type, || change.new_cache())?;
                let copy = match state.caches.get_erased(type_id) {
                    Some(cache) => cache.clone_box(),
                    None => change.new_cache(),
                };
                staged.insert(type_id, copy);
            }
            if let Some(cache) = staged.get_mut(&type_id) {
                cache.apply(change)?;
            }
        }

        for (type_id, cache) in staged.iter_mut() {
            cache.check_unique()?;
            let entity = cache.entity_type().name;
            let mut last = state.last_ids.get(type_id).copied().unwrap_or(EntityId::new(0));
            if let Some(max) = cache.max_id() {
                last = last.max(max);
            }
            cache.assign_missing_ids(&mut || advance(&mut last, entity))?;
            cache.rebuild();
            state.last_ids.insert(*type_id, last);
        }

        let committed: Vec<Box<dyn AnyCache>> = staged.values().map(|c| c.clone_box()).collect();
        for (_, cache) in staged {
            state.caches.insert_erased(cache);
        }

        tracing::info!(
            added = changeset.count(crate::changeset::ChangeKind::Add),
            updated = changeset.count(crate::changeset::ChangeKind::Update),
            removed = changeset.count(crate::changeset::ChangeKind::Remove),
            "changeset committed"
        );
        Ok(committed)
    }
}

impl Repository for MemoryRepository {
    fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn load<E: Entity>(&self) -> StoreResult<Vec<Shared<E>>> {
        let mut state = self.lock()?;
        self.ensure_loaded(&mut state, EntityType::of::<E>(), crate::cache::empty_cache::<E>)?;
        let cache = state.caches.get::<E>().ok_or_else(|| StoreError::WrongEntityType {
            expected: E::TYPE_NAME,
            found: "unregistered cache".to_string(),
        })?;
        Ok(cache.entities().to_vec())
    }

    fn new_id<E: Entity>(&self) -> StoreResult<EntityId> {
        let mut state = self.lock()?;
        self.ensure_loaded(&mut state, EntityType::of::<E>(), crate::cache::empty_cache::<E>)?;
        state.next_id(EntityType::of::<E>())
    }

    fn commit(&self, changeset: &Changeset) -> StoreResult<()> {
        self.apply(changeset).map(drop)
    }

    #[instrument(skip(self, changeset), fields(repository = %self.config.name))]
    fn rollback(&self, changeset: &Changeset) -> StoreResult<()> {
        tracing::debug!(discarded = changeset.len(), "changeset rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{Change, ChangeKind};
    use crate::handle::{read, write};
    use quarry_core::testing::Tag;

    fn tag(id: i64, name: &str) -> Tag {
        Tag {
            id: Some(EntityId::new(id)),
            ..Tag::new(name, 1.0)
        }
    }

    #[test]
    fn loader_runs_once_and_numbers_missing_ids() {
        let repo = MemoryRepository::default().with_entities(vec![tag(4, "red"), Tag::new("blue", 2.0)]);
        let loaded = repo.load::<Tag>().unwrap();
        let ids: Vec<_> = loaded.iter().map(|t| read(t).id).collect();
        assert_eq!(ids, vec![Some(EntityId::new(4)), Some(EntityId::new(5))]);
        assert_eq!(repo.new_id::<Tag>().unwrap(), EntityId::new(6));
        assert_eq!(repo.new_id::<Tag>().unwrap(), EntityId::new(7));
    }

    #[test]
    fn loader_duplicates_fail_the_load() {
        let repo = MemoryRepository::default().with_entities(vec![tag(1, "red"), tag(1, "blue")]);
        assert!(matches!(repo.load::<Tag>(), Err(StoreError::DuplicateId { .. })));
    }

    #[test]
    fn commit_stores_copies_not_session_handles() {
        let repo = MemoryRepository::default();
        let red = share(tag(1, "red"));
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Add, red.clone()));
        repo.commit(&changeset).unwrap();

        write(&red).weight = 9.0;
        let stored = repo.load::<Tag>().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(read(&stored[0]).weight, 1.0);
    }

    #[test]
    fn failed_commit_leaves_the_store_untouched() {
        let repo = MemoryRepository::default().with_entities(vec![tag(1, "red")]);
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Add, share(tag(2, "blue"))));
        changeset.push(Change::new(ChangeKind::Add, share(tag(3, "red"))));

        let err = repo.commit(&changeset).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSlug { .. }));
        let names: Vec<_> = repo.load::<Tag>().unwrap().iter().map(|t| read(t).name.clone()).collect();
        assert_eq!(names, vec!["red"]);
    }

    #[test]
    fn commit_numbers_entities_added_without_ids() {
        let repo = MemoryRepository::default().with_entities(vec![tag(3, "red")]);
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Add, share(Tag::new("blue", 1.0))));
        repo.commit(&changeset).unwrap();

        let ids: Vec<_> = repo.load::<Tag>().unwrap().iter().map(|t| read(t).id).collect();
        assert_eq!(ids, vec![Some(EntityId::new(3)), Some(EntityId::new(4))]);
        assert_eq!(repo.new_id::<Tag>().unwrap(), EntityId::new(5));
    }

    #[test]
    fn one_changeset_may_swap_two_slugs() {
        let repo = MemoryRepository::default().with_entities(vec![tag(1, "red"), tag(2, "blue")]);
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Update, share(tag(1, "blue"))));
        changeset.push(Change::new(ChangeKind::Update, share(tag(2, "red"))));
        repo.commit(&changeset).unwrap();

        let mut stored: Vec<_> = repo.load::<Tag>().unwrap().iter().map(|t| read(t).clone()).collect();
        stored.sort_by_key(|t| t.id);
        assert_eq!(stored, vec![tag(1, "blue"), tag(2, "red")]);
    }

    #[test]
    fn updates_leaving_a_slug_taken_twice_are_rejected() {
        let repo = MemoryRepository::default().with_entities(vec![tag(1, "red"), tag(2, "blue")]);
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Update, share(tag(1, "blue"))));

        let err = repo.commit(&changeset).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSlug { ref slug, .. } if slug == "blue"));
        let names: Vec<_> = repo.load::<Tag>().unwrap().iter().map(|t| read(t).name.clone()).collect();
        assert_eq!(names, vec!["red", "blue"]);
    }

    #[test]
    fn exhausted_id_sequence_is_an_error() {
        let repo = MemoryRepository::default().with_entities(vec![tag(i64::MAX, "red")]);
        assert!(matches!(repo.new_id::<Tag>(), Err(StoreError::IdsExhausted { entity: "tag" })));

        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Add, share(Tag::new("blue", 1.0))));
        assert!(matches!(repo.commit(&changeset), Err(StoreError::IdsExhausted { .. })));
        assert_eq!(repo.len::<Tag>().unwrap(), 1);
    }

    #[test]
    fn update_and_remove_apply_by_id() {
        let repo = MemoryRepository::default().with_entities(vec![tag(1, "red"), tag(2, "blue")]);
        let mut changeset = Changeset::new();
        changeset.push(Change::new(ChangeKind::Update, share(Tag { weight: 5.0, ..tag(1, "crimson") })));
        changeset.push(Change::new(ChangeKind::Remove, share(tag(2, "blue"))));
        repo.commit(&changeset).unwrap();

        let stored = repo.load::<Tag>().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(*read(&stored[0]), Tag { weight: 5.0, ..tag(1, "crimson") });
    }
}
