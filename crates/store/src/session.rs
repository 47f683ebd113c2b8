//! Sessions: one logical transaction over a repository.
//!
//! A session checks out working copies of each entity type on first access,
//! tracks every change in its [`UnitOfWork`] and hands the delta to the
//! repository on [`Session::commit`]. Reads always see the session's own
//! writes and never another session's uncommitted ones.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use quarry_core::{Entity, EntityId, Shared};
use tracing::instrument;

use crate::cache::{CacheMap, EntityCache};
use crate::error::{StoreError, StoreResult};
use crate::handle::write;
use crate::repository::Repository;
use crate::unit_of_work::{EntityState, UnitOfWork};

pub struct Session<R: Repository> {
    repository: R,
    unit_of_work: UnitOfWork,
    caches: CacheMap,
}

impl<R: Repository> core::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("repository", &self.repository.config().name)
            .field("unit_of_work", &self.unit_of_work)
            .field("caches", &self.caches)
            .finish()
    }
}

impl<R: Repository> Session<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            unit_of_work: UnitOfWork::new(),
            caches: CacheMap::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    /// State of `entity` in this session, `None` when untracked.
    pub fn state<E: Entity>(&self, entity: &Shared<E>) -> Option<EntityState> {
        self.unit_of_work.state(entity)
    }

    /// Add `entity` as NEW, giving it the next id of its type when it has
    /// none.
    ///
    /// Adding an entity this session removed brings it back. Adding an
    /// entity already in the session is a no-op.
    pub fn add<E: Entity>(&mut self, entity: Shared<E>) -> StoreResult<()> {
        let revived = self.unit_of_work.state(&entity) == Some(EntityState::Deleted);
        let cache = self.checkout::<E>()?;
        if cache.contains(&entity) {
            return Ok(());
        }
        cache.add(entity.clone())?;

        if crate::handle::keys(&entity).0.is_none() {
            let id = match self.unused_id::<E>() {
                Ok(id) => id,
                Err(err) => {
                    self.checkout::<E>()?.remove(&entity)?;
                    return Err(err);
                }
            };
            write(&entity).set_id(id);
            self.checkout::<E>()?.invalidate();
        }

        if revived {
            match self.unit_of_work.release(&entity) {
                Some((EntityState::Clean, snapshot)) => self.unit_of_work.register_clean_with(&entity, snapshot),
                _ => self.unit_of_work.register_new(&entity),
            }
        } else {
            self.unit_of_work.register_new(&entity);
        }
        tracing::debug!(entity = E::TYPE_NAME, revived, "entity added");

        self.autocommit()
    }

    /// Remove `entity` from the session's view; the removal reaches the
    /// repository on commit.
    pub fn remove<E: Entity>(&mut self, entity: &Shared<E>) -> StoreResult<()> {
        let removed = self.checkout::<E>()?.remove(entity)?;
        if self.unit_of_work.is_registered(&removed) {
            self.unit_of_work.mark_deleted(&removed);
        }
        tracing::debug!(entity = E::TYPE_NAME, "entity removed");

        self.autocommit()
    }

    /// Put `entity` in place of the session's entity with the same id.
    pub fn replace<E: Entity>(&mut self, entity: Shared<E>) -> StoreResult<()> {
        let previous = self.checkout::<E>()?.replace(entity.clone())?;
        match self.unit_of_work.release(&previous) {
            Some((EntityState::Clean, snapshot)) => self.unit_of_work.register_clean_with(&entity, snapshot),
            _ => self.unit_of_work.register_new(&entity),
        }
        Ok(())
    }

    pub fn get_by_id<E: Entity>(&mut self, id: EntityId) -> StoreResult<Option<Shared<E>>> {
        self.read_through::<E>()?;
        Ok(self.checkout::<E>()?.get_by_id(id))
    }

    pub fn get_by_slug<E: Entity>(&mut self, slug: &str) -> StoreResult<Option<Shared<E>>> {
        self.read_through::<E>()?;
        Ok(self.checkout::<E>()?.get_by_slug(slug))
    }

    /// Every entity of type `E` visible in this session, in cache order.
    pub fn all<E: Entity>(&mut self) -> StoreResult<Vec<Shared<E>>> {
        self.read_through::<E>()?;
        Ok(self.checkout::<E>()?.entities().to_vec())
    }

    /// Rebuild every checked-out index, picking up slugs and ids that
    /// changed since they were indexed.
    pub fn flush(&mut self) {
        for cache in self.caches.iter_mut() {
            cache.rebuild();
        }
    }

    /// Hand the delta to the repository and start over.
    ///
    /// On failure the session keeps its state so the caller can roll back.
    #[instrument(skip(self), fields(repository = %self.repository.config().name))]
    pub fn commit(&mut self) -> StoreResult<()> {
        self.flush();
        let changeset = self.unit_of_work.changeset();
        if let Err(err) = self.repository.commit(&changeset) {
            tracing::warn!(error = %err, changes = changeset.len(), "commit failed");
            return Err(err);
        }
        self.reset();
        Ok(())
    }

    /// Discard the delta and start over.
    #[instrument(skip(self), fields(repository = %self.repository.config().name))]
    pub fn rollback(&mut self) -> StoreResult<()> {
        let changeset = self.unit_of_work.changeset();
        self.repository.rollback(&changeset)?;
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.unit_of_work.reset();
        self.caches.clear();
    }

    fn autocommit(&mut self) -> StoreResult<()> {
        if self.repository.config().autocommit {
            self.commit()
        } else {
            Ok(())
        }
    }

    /// Next repository id of `E` not already taken in this session.
    fn unused_id<E: Entity>(&mut self) -> StoreResult<EntityId> {
        loop {
            let id = self.repository.new_id::<E>()?;
            if self.checkout::<E>()?.get_by_id(id).is_none() {
                return Ok(id);
            }
        }
    }

    fn read_through<E: Entity>(&mut self) -> StoreResult<()> {
        if self.repository.config().autoflush {
            self.checkout::<E>()?.rebuild();
        }
        Ok(())
    }

    /// The session's cache of `E`, populated with tracked working copies on
    /// first access.
    fn checkout<E: Entity>(&mut self) -> StoreResult<&mut EntityCache<E>> {
        if !self.caches.contains(TypeId::of::<E>()) {
            let loaded = self.repository.load::<E>()?;
            let copies: Vec<_> = loaded.iter().map(|e| self.unit_of_work.register_clean(e)).collect();
            self.caches.insert(EntityCache::from_entities(copies)?);
            tracing::trace!(entity = E::TYPE_NAME, count = loaded.len(), "working copies checked out");
        }
        self.caches.get_mut::<E>().ok_or_else(|| StoreError::WrongEntityType {
            expected: E::TYPE_NAME,
            found: "foreign cache".to_string(),
        })
    }
}

/// Hands out one session per thread over a shared repository.
pub struct SessionFactory<R: Repository + Clone> {
    repository: R,
    sessions: Mutex<HashMap<ThreadId, Arc<Mutex<Session<R>>>>>,
}

impl<R: Repository + Clone> SessionFactory<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// The calling thread's session, created on first use.
    pub fn session(&self) -> StoreResult<Arc<Mutex<Session<R>>>> {
        let mut sessions = self.lock()?;
        let session = sessions
            .entry(thread::current().id())
            .or_insert_with(|| {
                tracing::debug!(repository = %self.repository.config().name, "session opened");
                Arc::new(Mutex::new(Session::new(self.repository.clone())))
            })
            .clone();
        Ok(session)
    }

    /// Drop the calling thread's session; uncommitted changes are lost.
    pub fn release(&self) -> StoreResult<bool> {
        Ok(self.lock()?.remove(&thread::current().id()).is_some())
    }

    /// Number of threads currently holding a session.
    pub fn active(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<ThreadId, Arc<Mutex<Session<R>>>>>> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::LockPoisoned("session registry"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::handle::read;
    use crate::repository::MemoryRepository;
    use quarry_core::share;
    use quarry_core::testing::{Person, Tag};

    fn tag(id: i64, name: &str) -> Tag {
        Tag {
            id: Some(EntityId::new(id)),
            ..Tag::new(name, 1.0)
        }
    }

    fn session_over(repo: MemoryRepository) -> Session<Arc<MemoryRepository>> {
        Session::new(Arc::new(repo))
    }

    #[test]
    fn add_assigns_the_next_id_and_tracks_new() {
        let mut session = session_over(MemoryRepository::default().with_entities(vec![tag(7, "red")]));
        let blue = share(Tag::new("blue", 1.0));
        session.add(blue.clone()).unwrap();

        assert_eq!(read(&blue).id, Some(EntityId::new(8)));
        assert_eq!(session.state(&blue), Some(EntityState::New));
        assert!(Arc::ptr_eq(&session.get_by_slug::<Tag>("blue").unwrap().unwrap(), &blue));
    }

    #[test]
    fn id_assignment_skips_ids_taken_in_the_session() {
        let mut session = session_over(MemoryRepository::default());
        session.add(share(tag(1, "red"))).unwrap();
        let blue = share(Tag::new("blue", 1.0));
        session.add(blue.clone()).unwrap();
        assert_eq!(read(&blue).id, Some(EntityId::new(2)));
    }

    #[test]
    fn duplicates_are_rejected_before_tracking() {
        let mut session = session_over(MemoryRepository::default().with_entities(vec![tag(5, "red")]));
        let clash = share(tag(5, "blue"));
        assert!(matches!(session.add(clash.clone()), Err(StoreError::DuplicateId { .. })));
        assert_eq!(session.state(&clash), None);
    }

    #[test]
    fn failed_id_assignment_leaves_the_session_untouched() {
        let mut session = session_over(MemoryRepository::default().with_entities(vec![tag(i64::MAX, "red")]));
        let blue = share(Tag::new("blue", 1.0));

        let err = session.add(blue.clone()).unwrap_err();
        assert!(matches!(err, StoreError::IdsExhausted { .. }));
        assert_eq!(session.state(&blue), None);
        assert!(session.get_by_slug::<Tag>("blue").unwrap().is_none());
        assert_eq!(session.all::<Tag>().unwrap().len(), 1);
    }

    #[test]
    fn loaded_entities_are_clean_working_copies() {
        let repo = Arc::new(MemoryRepository::default().with_entities(vec![tag(1, "red")]));
        let mut session = Session::new(repo.clone());
        let red = session.get_by_id::<Tag>(EntityId::new(1)).unwrap().unwrap();
        assert_eq!(session.state(&red), Some(EntityState::Clean));

        write(&red).weight = 4.0;
        assert_eq!(session.state(&red), Some(EntityState::Dirty));
        assert_eq!(read(&repo.load::<Tag>().unwrap()[0]).weight, 1.0);
    }

    #[test]
    fn removed_entities_disappear_from_reads_but_stay_tracked() {
        let mut session = session_over(MemoryRepository::default().with_entities(vec![tag(1, "red")]));
        let red = session.get_by_slug::<Tag>("red").unwrap().unwrap();
        session.remove(&red).unwrap();

        assert!(session.get_by_id::<Tag>(EntityId::new(1)).unwrap().is_none());
        assert!(session.all::<Tag>().unwrap().is_empty());
        assert_eq!(session.state(&red), Some(EntityState::Deleted));
    }

    #[test]
    fn re_adding_a_removed_entity_cancels_the_removal() {
        let repo = Arc::new(MemoryRepository::default().with_entities(vec![tag(1, "red")]));
        let mut session = Session::new(repo.clone());
        let red = session.get_by_id::<Tag>(EntityId::new(1)).unwrap().unwrap();
        session.remove(&red).unwrap();
        session.add(red.clone()).unwrap();

        assert_eq!(session.state(&red), Some(EntityState::Clean));
        assert!(session.unit_of_work().changeset().is_empty());
        session.commit().unwrap();
        assert_eq!(repo.len::<Tag>().unwrap(), 1);
    }

    #[test]
    fn commit_publishes_and_resets() {
        let repo = Arc::new(MemoryRepository::default().with_entities(vec![tag(1, "red"), tag(2, "blue")]));
        let mut session = Session::new(repo.clone());
        session.add(share(Tag::new("green", 1.0))).unwrap();
        let red = session.get_by_id::<Tag>(EntityId::new(1)).unwrap().unwrap();
        write(&red).weight = 3.0;
        let blue = session.get_by_id::<Tag>(EntityId::new(2)).unwrap().unwrap();
        session.remove(&blue).unwrap();

        session.commit().unwrap();
        assert!(session.unit_of_work().is_empty());

        let mut names: Vec<_> = repo
            .load::<Tag>()
            .unwrap()
            .iter()
            .map(|t| (read(t).name.clone(), read(t).weight))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(names, vec![("green".to_string(), 1.0), ("red".to_string(), 3.0)]);
    }

    #[test]
    fn rollback_discards_and_reloads() {
        let repo = Arc::new(MemoryRepository::default().with_entities(vec![tag(1, "red")]));
        let mut session = Session::new(repo.clone());
        session.add(share(Tag::new("green", 1.0))).unwrap();
        session.rollback().unwrap();

        assert_eq!(session.all::<Tag>().unwrap().len(), 1);
        assert_eq!(repo.len::<Tag>().unwrap(), 1);
    }

    #[test]
    fn failed_commit_keeps_the_unit_of_work() {
        let repo = Arc::new(MemoryRepository::default());
        let mut first = Session::new(repo.clone());
        let mut second = Session::new(repo.clone());
        first.add(share(tag(1, "red"))).unwrap();
        second.add(share(tag(2, "red"))).unwrap();
        first.commit().unwrap();

        assert!(matches!(second.commit(), Err(StoreError::DuplicateSlug { .. })));
        assert_eq!(second.unit_of_work().len(), 1);
        second.rollback().unwrap();
        assert_eq!(second.all::<Tag>().unwrap().len(), 1);
    }

    #[test]
    fn autocommit_publishes_each_add() {
        let repo = Arc::new(MemoryRepository::new(RepositoryConfig::named("auto").with_autocommit(true)));
        let mut session = Session::new(repo.clone());
        session.add(share(Tag::new("red", 1.0))).unwrap();
        assert_eq!(repo.len::<Tag>().unwrap(), 1);
        assert!(session.unit_of_work().is_empty());
    }

    #[test]
    fn lazily_derived_slugs_need_autoflush_or_flush() {
        let repo = Arc::new(MemoryRepository::new(RepositoryConfig::default().with_autoflush(false)));
        let mut session = Session::new(repo);
        let ann = share(Person::new("Ann", 61));
        session.add(ann.clone()).unwrap();
        assert!(session.get_by_slug::<Person>("annie").unwrap().is_none());

        write(&ann).nickname = Some("annie".into());
        assert!(session.get_by_slug::<Person>("annie").unwrap().is_none());
        session.flush();
        assert!(Arc::ptr_eq(&session.get_by_slug::<Person>("annie").unwrap().unwrap(), &ann));
    }

    #[test]
    fn replace_swaps_the_working_copy_and_records_an_update() {
        let repo = Arc::new(MemoryRepository::default().with_entities(vec![tag(1, "red")]));
        let mut session = Session::new(repo.clone());
        let crimson = share(Tag { weight: 2.0, ..tag(1, "crimson") });
        session.replace(crimson.clone()).unwrap();

        assert_eq!(session.state(&crimson), Some(EntityState::Dirty));
        session.commit().unwrap();
        assert_eq!(read(&repo.load::<Tag>().unwrap()[0]).name, "crimson");
    }

    #[test]
    fn factory_gives_each_thread_its_own_session() {
        let factory = Arc::new(SessionFactory::new(Arc::new(MemoryRepository::default())));
        let here = factory.session().unwrap();
        assert!(Arc::ptr_eq(&here, &factory.session().unwrap()));

        let remote = {
            let factory = factory.clone();
            thread::spawn(move || factory.session().unwrap()).join().unwrap()
        };
        assert!(!Arc::ptr_eq(&here, &remote));
        assert_eq!(factory.active().unwrap(), 2);
        assert!(factory.release().unwrap());
        assert_eq!(factory.active().unwrap(), 1);
    }
}
