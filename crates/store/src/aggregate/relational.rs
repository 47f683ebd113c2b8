use std::sync::Arc;
use std::vec;

use quarry_core::{Entity, EntityId, Schema, Shared, share};
use quarry_query::sql::{RenderedQuery, SelectQuery, select};
use quarry_query::{FilterSpec, eq};

use crate::error::{StoreError, StoreResult};
use crate::handle::{keys, read, write};

use super::{Aggregate, View};

/// Attribute every relationally stored entity declares for its id.
pub const ID_ATTRIBUTE: &str = "id";

/// Executes rendered queries and row mutations for one entity type.
pub trait RelationalConnection<E>: Send + Sync {
    fn fetch(&self, query: &RenderedQuery) -> StoreResult<Vec<E>>;

    fn count(&self, query: &RenderedQuery) -> StoreResult<usize>;

    /// Insert `entity`, returning its id.
    fn insert(&self, entity: &E) -> StoreResult<EntityId>;

    /// Whether a row was deleted.
    fn delete(&self, id: EntityId) -> StoreResult<bool>;

    /// Whether a row was updated.
    fn update(&self, entity: &E) -> StoreResult<bool>;
}

impl<E, C: RelationalConnection<E>> RelationalConnection<E> for Arc<C> {
    fn fetch(&self, query: &RenderedQuery) -> StoreResult<Vec<E>> {
        (**self).fetch(query)
    }

    fn count(&self, query: &RenderedQuery) -> StoreResult<usize> {
        (**self).count(query)
    }

    fn insert(&self, entity: &E) -> StoreResult<EntityId> {
        (**self).insert(entity)
    }

    fn delete(&self, id: EntityId) -> StoreResult<bool> {
        (**self).delete(id)
    }

    fn update(&self, entity: &E) -> StoreResult<bool> {
        (**self).update(entity)
    }
}

/// Aggregate answering every read with a single query.
pub struct RelationalAggregate<E, C> {
    connection: C,
    schema: Arc<Schema>,
    view: View,
    _entity: core::marker::PhantomData<fn() -> E>,
}

impl<E: Entity, C: RelationalConnection<E>> RelationalAggregate<E, C> {
    pub fn new(connection: C, schema: Arc<Schema>) -> Self {
        Self {
            connection,
            schema,
            view: View::default(),
            _entity: core::marker::PhantomData,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Query over the view's filter narrowed by `extra`.
    fn query(&self, extra: Option<FilterSpec>, ordered: bool, window: Option<(usize, usize)>) -> StoreResult<SelectQuery> {
        let filter = match (self.view.filter.clone(), extra) {
            (Some(filter), Some(extra)) => Some(filter & extra),
            (filter, extra) => filter.or(extra),
        };
        let order = if ordered { self.view.order.as_ref() } else { None };
        Ok(select::<E>(&self.schema, filter.as_ref(), order, window)?)
    }

    fn fetch_unique(&self, query: SelectQuery, key: &str) -> StoreResult<Option<Shared<E>>> {
        let mut rows = self.connection.fetch(&query.render())?;
        if rows.len() > 1 {
            return Err(StoreError::duplicate_result(E::TYPE_NAME, key));
        }
        Ok(rows.pop().map(share))
    }

    fn lookup_by_slug(&self, slug: &str, filtered: bool) -> StoreResult<Option<Shared<E>>> {
        let base = if filtered { self.view.filter.clone() } else { None };
        match E::SLUG_ATTRIBUTE {
            Some(attribute) => {
                let filter = base.map_or_else(|| eq(attribute, slug), |f| f & eq(attribute, slug));
                let query = select::<E>(&self.schema, Some(&filter), None, Some((0, 2)))?;
                self.fetch_unique(query, slug)
            }
            None => {
                let query = select::<E>(&self.schema, base.as_ref(), None, None)?;
                let mut matching = self
                    .connection
                    .fetch(&query.render())?
                    .into_iter()
                    .filter(|e| e.slug().as_deref() == Some(slug));
                let first = matching.next();
                if matching.next().is_some() {
                    return Err(StoreError::duplicate_result(E::TYPE_NAME, slug));
                }
                Ok(first.map(share))
            }
        }
    }

    fn lookup_by_id(&self, id: EntityId, filtered: bool) -> StoreResult<Option<Shared<E>>> {
        let by_id = eq(ID_ATTRIBUTE, id);
        let query = if filtered {
            self.query(Some(by_id), false, Some((0, 2)))?
        } else {
            select::<E>(&self.schema, Some(&by_id), None, Some((0, 2)))?
        };
        self.fetch_unique(query, &id.to_string())
    }

    fn required_id(entity: &Shared<E>) -> StoreResult<EntityId> {
        read(entity)
            .id()
            .ok_or_else(|| StoreError::not_found(E::TYPE_NAME, "entity without id"))
    }
}

impl<E: Entity, C: RelationalConnection<E>> Aggregate<E> for RelationalAggregate<E, C> {
    fn view(&self) -> &View {
        &self.view
    }

    fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    fn count(&self) -> StoreResult<usize> {
        let query = self.query(None, false, None)?;
        if self.view.is_suppressed() {
            return Ok(0);
        }
        self.connection.count(&query.render_count())
    }

    fn iterator(&self) -> StoreResult<vec::IntoIter<Shared<E>>> {
        let query = self.query(None, true, self.view.slice)?;
        if self.view.is_suppressed() {
            return Ok(Vec::new().into_iter());
        }
        let rendered = query.render();
        tracing::debug!(entity = E::TYPE_NAME, sql = %rendered.sql, params = rendered.params.len(), "fetching");
        let rows = self.connection.fetch(&rendered)?;
        Ok(rows.into_iter().map(share).collect::<Vec<_>>().into_iter())
    }

    fn get_by_id(&self, id: EntityId) -> StoreResult<Option<Shared<E>>> {
        self.lookup_by_id(id, true)
    }

    fn get_by_slug(&self, slug: &str) -> StoreResult<Option<Shared<E>>> {
        self.lookup_by_slug(slug, true)
    }

    fn add(&mut self, entity: Shared<E>) -> StoreResult<()> {
        let (id, slug) = keys(&entity);
        if let Some(id) = id {
            if self.lookup_by_id(id, false)?.is_some() {
                return Err(StoreError::duplicate_id(E::TYPE_NAME, id));
            }
        }
        if let Some(slug) = slug {
            if self.lookup_by_slug(&slug, false)?.is_some() {
                return Err(StoreError::duplicate_slug(E::TYPE_NAME, slug));
            }
        }

        let id = self.connection.insert(&read(&entity))?;
        write(&entity).set_id(id);
        tracing::debug!(entity = E::TYPE_NAME, %id, "row inserted");
        Ok(())
    }

    fn remove(&mut self, entity: &Shared<E>) -> StoreResult<()> {
        let id = Self::required_id(entity)?;
        if !self.connection.delete(id)? {
            return Err(StoreError::not_found(E::TYPE_NAME, id));
        }
        Ok(())
    }

    fn update(&mut self, entity: Shared<E>) -> StoreResult<()> {
        let id = Self::required_id(&entity)?;
        if !self.connection.update(&read(&entity))? {
            return Err(StoreError::not_found(E::TYPE_NAME, id));
        }
        Ok(())
    }
}
