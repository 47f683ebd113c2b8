//! Aggregates: per-type query and mutation accessors.
//!
//! An aggregate combines a base entity source with an optional filter, an
//! optional order and an optional `(offset, limit)` slice. Specifications
//! are compiled before any backend work, so a bad path or an operator that
//! does not fit its attribute fails without side effects.

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod relational;

pub use memory::{ChildSource, MemoryAggregate, Relationship};
pub use relational::{RelationalAggregate, RelationalConnection};

use std::vec;

use quarry_core::{EntityId, Shared};
use quarry_query::{FilterSpec, OrderSpec};

use crate::error::StoreResult;

/// Filter, order, slice and search mode of an aggregate.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub filter: Option<FilterSpec>,
    pub order: Option<OrderSpec>,
    /// `(offset, limit)`.
    pub slice: Option<(usize, usize)>,
    /// When set and no filter is present, the aggregate is empty.
    pub search_mode: bool,
}

impl View {
    /// Whether search mode short-circuits every read.
    pub fn is_suppressed(&self) -> bool {
        self.search_mode && self.filter.is_none()
    }
}

pub trait Aggregate<E> {
    fn view(&self) -> &View;

    fn view_mut(&mut self) -> &mut View;

    /// Number of entities passing the filter, ignoring the slice.
    fn count(&self) -> StoreResult<usize>;

    /// Filtered, then ordered, then sliced entities. Every call re-runs the
    /// whole pipeline.
    fn iterator(&self) -> StoreResult<vec::IntoIter<Shared<E>>>;

    fn get_by_id(&self, id: EntityId) -> StoreResult<Option<Shared<E>>>;

    fn get_by_slug(&self, slug: &str) -> StoreResult<Option<Shared<E>>>;

    fn add(&mut self, entity: Shared<E>) -> StoreResult<()>;

    fn remove(&mut self, entity: &Shared<E>) -> StoreResult<()>;

    fn update(&mut self, entity: Shared<E>) -> StoreResult<()>;

    fn filter(&self) -> Option<&FilterSpec> {
        self.view().filter.as_ref()
    }

    fn set_filter(&mut self, filter: Option<FilterSpec>) {
        self.view_mut().filter = filter;
    }

    fn order(&self) -> Option<&OrderSpec> {
        self.view().order.as_ref()
    }

    fn set_order(&mut self, order: Option<OrderSpec>) {
        self.view_mut().order = order;
    }

    fn slice(&self) -> Option<(usize, usize)> {
        self.view().slice
    }

    fn set_slice(&mut self, slice: Option<(usize, usize)>) {
        self.view_mut().slice = slice;
    }

    fn search_mode(&self) -> bool {
        self.view().search_mode
    }

    /// Opt in to returning nothing while no filter is set.
    fn set_search_mode(&mut self, enabled: bool) {
        self.view_mut().search_mode = enabled;
    }
}
