//! Repositories: the authoritative, cross-session entity store.

mod file;
mod memory;

pub use file::{FileRepository, JsonLinesPersister, Persister};
pub use memory::MemoryRepository;

use std::sync::Arc;

use quarry_core::{Entity, EntityId, Shared};

use crate::changeset::Changeset;
use crate::config::RepositoryConfig;
use crate::error::StoreResult;

/// Backing store shared by every session of one process.
///
/// A repository owns one authoritative cache per entity type and one
/// surrogate id sequence per type. Sessions never edit its entities
/// directly: they check out working copies through [`Repository::load`] and
/// hand their delta back through [`Repository::commit`].
///
/// ## Concurrency
///
/// Implementations serialise `commit` with a single repository-wide lock.
/// One commit is applied as a whole or not at all; commits from different
/// threads never interleave.
///
/// ## Ids
///
/// `new_id` hands out the next id of a type, starting above the largest id
/// loaded for that type. Ids are never reused, not even after a rollback.
pub trait Repository: Send + Sync {
    fn config(&self) -> &RepositoryConfig;

    /// Current entities of type `E`, loading the type on first access.
    fn load<E: Entity>(&self) -> StoreResult<Vec<Shared<E>>>;

    fn new_id<E: Entity>(&self) -> StoreResult<EntityId>;

    /// Apply one session's delta.
    fn commit(&self, changeset: &Changeset) -> StoreResult<()>;

    /// Discard one session's delta.
    fn rollback(&self, changeset: &Changeset) -> StoreResult<()>;
}

impl<S: Repository> Repository for Arc<S> {
    fn config(&self) -> &RepositoryConfig {
        (**self).config()
    }

    fn load<E: Entity>(&self) -> StoreResult<Vec<Shared<E>>> {
        (**self).load::<E>()
    }

    fn new_id<E: Entity>(&self) -> StoreResult<EntityId> {
        (**self).new_id::<E>()
    }

    fn commit(&self, changeset: &Changeset) -> StoreResult<()> {
        (**self).commit(changeset)
    }

    fn rollback(&self, changeset: &Changeset) -> StoreResult<()> {
        (**self).rollback(changeset)
    }
}
