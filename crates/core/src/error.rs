//! Core error model.

use thiserror::Error;

/// Result type used across the core layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Covers metadata problems detected while resolving attribute paths and
/// value validation. Storage and query failures have their own error types in
/// the crates that own those concerns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An attribute path could not be resolved against an entity type.
    #[error("invalid attribute `{path}` on `{entity}`: {reason}")]
    InvalidAttribute {
        entity: String,
        path: String,
        reason: String,
    },

    /// An entity type was used without being registered in the schema.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn invalid_attribute(
        entity: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            entity: entity.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType(name.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
