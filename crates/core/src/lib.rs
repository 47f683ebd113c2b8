//! `quarry-core` — entity and metadata foundation.
//!
//! This crate has no storage or query concerns: it defines what an entity
//! is, how its attributes are declared and read, and how dotted attribute
//! paths resolve across relations.

pub mod entity;
pub mod error;
pub mod id;
pub mod inspect;
pub mod meta;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use entity::{Entity, EntityType, Field, Record, RecordRef, Shared, StateData, StateValue, share};
pub use error::{CoreError, CoreResult};
pub use id::EntityId;
pub use inspect::{AttributeStep, inspect};
pub use meta::{Attribute, AttributeKind, EntityMeta, Schema};
pub use value::{Value, ValueKind};
