//! Attribute path inspection.
//!
//! Resolves dotted paths such as `parent.name` or `notes.text` into the chain
//! of attribute hops a query compiler needs to build nested predicates or
//! joins.

use std::any::TypeId;

use crate::error::{CoreError, CoreResult};
use crate::meta::{Attribute, AttributeKind, EntityMeta, Schema};

/// One resolved hop of an attribute path.
#[derive(Debug, Clone, Copy)]
pub struct AttributeStep<'s> {
    pub kind: AttributeKind,
    pub attribute: &'s Attribute,
    /// Type that declares `attribute`.
    pub owner: &'s EntityMeta,
}

/// Resolve `path` against the type registered under `root`.
///
/// Every non-final segment must be a relation; the final segment may be of
/// any kind.
pub fn inspect<'s>(schema: &'s Schema, root: TypeId, path: &str) -> CoreResult<Vec<AttributeStep<'s>>> {
    let mut owner = schema.meta(root)?;
    let root_name = owner.name();
    let segments: Vec<&str> = path.split('.').collect();
    let mut steps = Vec::with_capacity(segments.len());

    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(CoreError::invalid_attribute(root_name, path, "empty path segment"));
        }
        let attribute = owner.attribute(segment).ok_or_else(|| {
            CoreError::invalid_attribute(
                root_name,
                path,
                format!("`{}` has no attribute `{segment}`", owner.name()),
            )
        })?;
        steps.push(AttributeStep {
            kind: attribute.kind,
            attribute,
            owner,
        });

        if idx + 1 == segments.len() {
            break;
        }
        if attribute.kind == AttributeKind::Terminal {
            return Err(CoreError::invalid_attribute(
                root_name,
                path,
                format!("terminal attribute `{segment}` cannot be traversed"),
            ));
        }
        owner = schema.target_of(attribute)?;
    }

    Ok(steps)
}

impl Schema {
    pub fn inspect(&self, root: TypeId, path: &str) -> CoreResult<Vec<AttributeStep<'_>>> {
        inspect(self, root, path)
    }
}
