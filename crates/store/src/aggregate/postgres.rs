//! PostgreSQL-backed [`RelationalConnection`].
//!
//! Rows travel as JSON: reads wrap the rendered select in `row_to_json`,
//! writes go through `json_populate_record`. An entity's serde field names
//! must therefore match its table's column names, and only its terminal
//! attributes are written.

use std::marker::PhantomData;
use std::sync::Arc;

use quarry_core::{AttributeKind, Entity, EntityId, Value};
use quarry_query::sql::RenderedQuery;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use super::RelationalConnection;
use crate::error::{StoreError, StoreResult};

/// Connection over a sqlx pool, driven from a Tokio runtime.
///
/// ## Runtime
///
/// Calls block on the current Tokio runtime handle and fail with
/// [`StoreError::Connection`] outside of one. They must not be made from
/// inside an async task of a current-thread runtime.
pub struct PgRelationalConnection<E> {
    pool: Arc<PgPool>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> PgRelationalConnection<E> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            _entity: PhantomData,
        }
    }
}

fn bind<'q>(query: Query<'q, Postgres, PgArguments>, value: &Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) | Value::Url(s) => query.bind(s.clone()),
        Value::Timestamp(t) => query.bind(*t),
    }
}

fn runtime() -> StoreResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|e| StoreError::connection(format!("no tokio runtime: {e}")))
}

fn db_error(err: sqlx::Error) -> StoreError {
    StoreError::connection(err.to_string())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quoted terminal columns of `E`, without the id column.
fn writable_columns<E: Entity>() -> Vec<String> {
    E::ATTRIBUTES
        .iter()
        .filter(|a| a.kind == AttributeKind::Terminal && a.column != E::ID_COLUMN)
        .map(|a| quote(a.column))
        .collect()
}

fn row_json<E: Serialize>(entity: &E) -> StoreResult<String> {
    serde_json::to_string(entity).map_err(|e| StoreError::persist(e.to_string()))
}

impl<E> RelationalConnection<E> for PgRelationalConnection<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    fn fetch(&self, query: &RenderedQuery) -> StoreResult<Vec<E>> {
        let sql = format!("SELECT row_to_json(q)::text FROM ({}) AS q", query.sql);
        let handle = runtime()?;
        let pool = self.pool.clone();

        let rows = handle.block_on(async {
            let statement = query.params.iter().fold(sqlx::query(&sql), bind);
            statement.fetch_all(&*pool).await
        });
        rows.map_err(db_error)?
            .iter()
            .map(|row| {
                let text: String = row.try_get(0).map_err(db_error)?;
                serde_json::from_str(&text).map_err(|e| StoreError::persist(format!("{}: {e}", E::TABLE)))
            })
            .collect()
    }

    fn count(&self, query: &RenderedQuery) -> StoreResult<usize> {
        let handle = runtime()?;
        let pool = self.pool.clone();

        let row = handle
            .block_on(async {
                let statement = query.params.iter().fold(sqlx::query(&query.sql), bind);
                statement.fetch_one(&*pool).await
            })
            .map_err(db_error)?;
        let count: i64 = row.try_get(0).map_err(db_error)?;
        usize::try_from(count).map_err(|e| StoreError::connection(e.to_string()))
    }

    fn insert(&self, entity: &E) -> StoreResult<EntityId> {
        let columns = writable_columns::<E>().join(", ");
        let table = quote(E::TABLE);
        let sql = format!(
            "INSERT INTO {table} ({columns}) SELECT {columns} FROM json_populate_record(NULL::{table}, $1::json) RETURNING {}",
            quote(E::ID_COLUMN)
        );
        let json = row_json(entity)?;
        let handle = runtime()?;
        let pool = self.pool.clone();

        let row = handle
            .block_on(async { sqlx::query(&sql).bind(json).fetch_one(&*pool).await })
            .map_err(db_error)?;
        let id: i64 = row.try_get(0).map_err(db_error)?;
        tracing::debug!(table = E::TABLE, id, "row inserted");
        Ok(EntityId::new(id))
    }

    fn delete(&self, id: EntityId) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE {} = $1", quote(E::TABLE), quote(E::ID_COLUMN));
        let handle = runtime()?;
        let pool = self.pool.clone();

        let result = handle
            .block_on(async { sqlx::query(&sql).bind(id.get()).execute(&*pool).await })
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    fn update(&self, entity: &E) -> StoreResult<bool> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };
        let columns = writable_columns::<E>().join(", ");
        let table = quote(E::TABLE);
        let sql = format!(
            "UPDATE {table} SET ({columns}) = (SELECT {columns} FROM json_populate_record(NULL::{table}, $1::json)) WHERE {} = $2",
            quote(E::ID_COLUMN)
        );
        let json = row_json(entity)?;
        let handle = runtime()?;
        let pool = self.pool.clone();

        let result = handle
            .block_on(async { sqlx::query(&sql).bind(json).bind(id.get()).execute(&*pool).await })
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::testing::Tag;

    #[test]
    fn writable_columns_skip_the_id() {
        assert_eq!(writable_columns::<Tag>(), vec!["\"name\"", "\"weight\""]);
    }

    #[test]
    fn calls_outside_a_runtime_fail_cleanly() {
        assert!(matches!(runtime(), Err(StoreError::Connection(_))));
    }
}
