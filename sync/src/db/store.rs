//! Authoritative writes and bulk reads against PostgreSQL.

use arthub_engine::{Entity, SortOrder};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{is_identifier, normalize_row};
use crate::backend::{DataStore, Query};
use crate::error::{StoreError, StoreResult};

/// Columns the database assigns.
const SERVER_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// [`DataStore`] over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Client-writable columns of a row, checked to be plain identifiers.
fn writable_columns(entity: Entity, row: &Map<String, Value>) -> StoreResult<Vec<String>> {
    let mut columns = Vec::new();
    for column in row.keys() {
        if SERVER_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        if !is_identifier(column) {
            return Err(StoreError::Rejected(format!(
                "invalid column {:?} for {}",
                column, entity
            )));
        }
        columns.push(column.clone());
    }
    Ok(columns)
}

fn as_object(entity: Entity, value: Value) -> StoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Rejected(format!("{} row must be an object", entity))),
    }
}

/// `INSERT ... SELECT cols FROM jsonb_populate_record(...)` so each column is
/// cast to its declared type and omitted ones take their defaults.
pub fn insert_query(
    entity: Entity,
    row: Map<String, Value>,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let table = entity.table();
    let columns = writable_columns(entity, &row)?;

    let mut qb = QueryBuilder::new(format!("INSERT INTO {} ", table));
    if columns.is_empty() {
        qb.push("DEFAULT VALUES");
    } else {
        let list = columns.join(", ");
        qb.push(format!("({}) SELECT {} FROM jsonb_populate_record(NULL::{}, ", list, list, table));
        qb.push_bind(Value::Object(row));
        qb.push(")");
    }
    qb.push(format!(" RETURNING to_jsonb({}.*)", table));
    Ok(qb)
}

pub fn update_query(
    entity: Entity,
    id: &str,
    patch: Map<String, Value>,
) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let table = entity.table();
    let columns = writable_columns(entity, &patch)?;

    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", table));
    if !columns.is_empty() {
        let list = columns.join(", ");
        qb.push(format!("({}) = (SELECT {} FROM jsonb_populate_record(NULL::{}, ", list, list, table));
        qb.push_bind(Value::Object(patch));
        qb.push(")), ");
    }
    qb.push("updated_at = now() WHERE id::text = ");
    qb.push_bind(id.to_string());
    qb.push(format!(" RETURNING to_jsonb({}.*)", table));
    Ok(qb)
}

pub fn select_query(query: &Query) -> StoreResult<QueryBuilder<'static, Postgres>> {
    let table = query.entity.table();
    let mut qb = QueryBuilder::new(format!("SELECT to_jsonb(t.*) FROM {} t", table));

    if let Some(filter) = &query.filter {
        if !is_identifier(&filter.column) {
            return Err(StoreError::Rejected(format!(
                "invalid filter column {:?}",
                filter.column
            )));
        }
        qb.push(format!(" WHERE t.{}::text = ", filter.column));
        qb.push_bind(filter.value.clone());
    }

    let direction = match query.order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    qb.push(format!(" ORDER BY t.created_at {0}, t.id {0}", direction));

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
    }
    Ok(qb)
}

#[async_trait]
impl DataStore for PgStore {
    async fn insert(&self, entity: Entity, row: Value) -> StoreResult<Value> {
        let mut qb = insert_query(entity, as_object(entity, row)?)?;
        let mut stored: Value = qb.build_query_scalar().fetch_one(&self.pool).await?;
        normalize_row(&mut stored);
        tracing::debug!(table = %entity, id = ?stored.get("id"), "Inserted row");
        Ok(stored)
    }

    async fn update(&self, entity: Entity, id: &str, patch: Value) -> StoreResult<Value> {
        let mut qb = update_query(entity, id, as_object(entity, patch)?)?;
        let mut stored: Value = qb
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", entity, id)))?;
        normalize_row(&mut stored);
        Ok(stored)
    }

    async fn delete(&self, entity: Entity, id: &str) -> StoreResult<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id::text = $1", entity.table()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{} {}", entity, id)));
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Value>> {
        let mut qb = select_query(query)?;
        let mut rows: Vec<Value> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        rows.iter_mut().for_each(normalize_row);
        Ok(rows)
    }
}
