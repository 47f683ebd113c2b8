//! `quarry-store` — caches, units of work, sessions, repositories and
//! aggregates.
//!
//! ## Layers
//!
//! - [`cache::EntityCache`] holds the live entities of one type with weak
//!   id and slug indexes.
//! - [`unit_of_work::UnitOfWork`] tracks NEW / CLEAN / DIRTY / DELETED
//!   states per entity handle.
//! - [`session::Session`] combines both over a [`repository::Repository`]
//!   and turns the tracked states into a [`changeset::Changeset`] on commit.
//! - [`aggregate`] exposes filtered, ordered and sliced views over a session
//!   or a relational connection.

pub mod aggregate;
pub mod cache;
pub mod changeset;
pub mod config;
pub mod error;
pub mod handle;
pub mod repository;
pub mod session;
pub mod unit_of_work;

pub use aggregate::{
    Aggregate, ChildSource, MemoryAggregate, RelationalAggregate, RelationalConnection, Relationship, View,
};
pub use cache::{AnyCache, CacheMap, EntityCache};
pub use changeset::{Change, ChangeKind, Changeset};
pub use config::RepositoryConfig;
pub use error::{StoreError, StoreResult};
pub use repository::{FileRepository, JsonLinesPersister, MemoryRepository, Persister, Repository};
pub use session::{Session, SessionFactory};
pub use unit_of_work::{EntityState, TrackedEntity, UnitOfWork};
