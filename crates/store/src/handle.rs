//! Helpers over [`Shared`] entity handles.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use quarry_core::{Entity, EntityId, Shared};

/// Type-erased strong handle to a `RwLock<E>`.
pub type AnyShared = Arc<dyn Any + Send + Sync>;

pub(crate) type AnyWeak = Weak<dyn Any + Send + Sync>;

/// Read access that survives a writer having panicked.
pub(crate) fn read<E>(entity: &RwLock<E>) -> RwLockReadGuard<'_, E> {
    entity.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<E>(entity: &RwLock<E>) -> RwLockWriteGuard<'_, E> {
    entity.write().unwrap_or_else(PoisonError::into_inner)
}

/// Object identity of a handle: the address of its allocation.
pub(crate) fn identity<T: ?Sized>(handle: &Arc<T>) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// Current `(id, slug)` of an entity.
pub(crate) fn keys<E: Entity>(entity: &Shared<E>) -> (Option<EntityId>, Option<String>) {
    let entity = read(entity);
    (entity.id(), entity.slug())
}

/// Fresh handle holding a copy of the entity's current state.
pub(crate) fn detached<E: Entity>(entity: &Shared<E>) -> Shared<E> {
    Arc::new(RwLock::new(read(entity).clone()))
}
