//! Storage error model.

use quarry_core::EntityId;
use quarry_query::QueryError;
use thiserror::Error;

/// Result type used across the storage layer.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-level error.
///
/// Identity conflicts are always surfaced, never resolved by letting the
/// last write win. Unit-of-work contract violations are not represented
/// here: they are programming errors and panic.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {entity} id {id}")]
    DuplicateId { entity: &'static str, id: EntityId },

    #[error("duplicate {entity} slug `{slug}`")]
    DuplicateSlug { entity: &'static str, slug: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A lookup by a unique key matched more than one entity.
    #[error("more than one {entity} found for {key}")]
    DuplicateResult { entity: &'static str, key: String },

    #[error("expected a {expected} entity, got {found}")]
    WrongEntityType { expected: &'static str, found: String },

    #[error(transparent)]
    Query(#[from] QueryError),

    /// Loading from or dumping to the backing files failed.
    #[error("persistence failed: {0}")]
    Persist(String),

    /// The per-type id sequence has no id left to hand out.
    #[error("{entity} ids exhausted")]
    IdsExhausted { entity: &'static str },

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// The relational collaborator failed or is unavailable.
    #[error("connection error: {0}")]
    Connection(String),
}

impl StoreError {
    pub fn duplicate_id(entity: &'static str, id: EntityId) -> Self {
        Self::DuplicateId { entity, id }
    }

    pub fn ids_exhausted(entity: &'static str) -> Self {
        Self::IdsExhausted { entity }
    }

    pub fn duplicate_slug(entity: &'static str, slug: impl Into<String>) -> Self {
        Self::DuplicateSlug {
            entity,
            slug: slug.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn duplicate_result(entity: &'static str, key: impl core::fmt::Display) -> Self {
        Self::DuplicateResult {
            entity,
            key: key.to_string(),
        }
    }

    pub fn persist(msg: impl Into<String>) -> Self {
        Self::Persist(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}
