//! Statement executor for PostgreSQL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Either, Executor, FromRow, PgPool, TypeInfo};
use tracing::{debug, instrument, trace};

use folio_core::error::{StorageError, StorageResult};
use folio_core::ports::{CountRow, EdgeRow, QueryExecutor};
use folio_core::query::{
    RenderedSql, SORT_COLUMN_ALIAS, Statement, render_statement, render_statement_with_casts,
};

use super::database::Database;
use super::helpers::{batch_key, bind_value, param_cast, sort_key};

/// Rendered statements whose parameter casts are remembered.
const CAST_CACHE_CAPACITY: usize = 1024;

type Casts = Arc<[Option<String>]>;

// =============================================================================
// Row Types
// =============================================================================

#[derive(FromRow)]
struct PgEdgeRow {
    key: i32,
    node: Value,
    s1: Value,
}

impl PgEdgeRow {
    fn into_edge_row(self) -> StorageResult<EdgeRow> {
        Ok(EdgeRow {
            key: batch_key(self.key)?,
            node: self.node,
            sort_key: sort_key(self.s1, SORT_COLUMN_ALIAS)?,
        })
    }
}

#[derive(FromRow)]
struct PgCountRow {
    key: i32,
    count: i64,
}

impl PgCountRow {
    fn into_count_row(self) -> StorageResult<CountRow> {
        Ok(CountRow {
            key: batch_key(self.key)?,
            count: self.count,
        })
    }
}

#[derive(FromRow)]
struct PgNodeRow {
    node: Value,
}

// =============================================================================
// Executor Implementation
// =============================================================================

/// PostgreSQL implementation of [`QueryExecutor`].
///
/// Each statement is rendered once and sent as a single query; the
/// sub-queries of a batch travel together in one `UNION ALL`.
///
/// Cursor values come back as JSON, so a `timestamptz` or `uuid` sort key
/// is a string on the next page. Text and null parameters are cast to the
/// type PostgreSQL infers for their placeholder, learned once per SQL text
/// with a describe round trip.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
    casts: Arc<Mutex<HashMap<String, Casts>>>,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            casts: Arc::default(),
        }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    async fn fetch<O>(&self, statement: &Statement) -> StorageResult<Vec<O>>
    where
        O: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut rendered = render_statement(statement)?;
        let casts = self.param_casts(&rendered).await;
        if casts.iter().any(Option::is_some) {
            rendered = render_statement_with_casts(statement, &casts)?;
        }
        trace!(sql = %rendered.sql, params = rendered.params.len(), "Executing statement");

        let query = rendered
            .params
            .iter()
            .fold(sqlx::query_as::<_, O>(&rendered.sql), bind_value);

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))
    }

    /// Casts for the text-bound parameters of `rendered`.
    ///
    /// Falls back to no casts when the statement cannot be described; the
    /// query itself then reports the error.
    async fn param_casts(&self, rendered: &RenderedSql) -> Casts {
        if !rendered
            .params
            .iter()
            .any(|value| matches!(value, Value::String(_) | Value::Null))
        {
            return Arc::from(Vec::new());
        }

        let cached = self.casts.lock().get(&rendered.sql).cloned();
        if let Some(casts) = cached {
            return casts;
        }

        let described = match (&self.pool).describe(&rendered.sql).await {
            Ok(described) => described,
            Err(e) => {
                debug!(error = %e, "Could not infer parameter types");
                return Arc::from(Vec::new());
            }
        };
        let inferred: Vec<String> = match described.parameters() {
            Some(Either::Left(types)) => types.iter().map(|ty| ty.name().to_string()).collect(),
            _ => Vec::new(),
        };

        let casts: Casts = rendered
            .params
            .iter()
            .zip(&inferred)
            .map(|(value, ty)| param_cast(value, ty))
            .collect();

        let mut cache = self.casts.lock();
        if cache.len() >= CAST_CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(rendered.sql.clone(), Arc::clone(&casts));
        casts
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    #[instrument(skip_all, fields(parts = statement.len()))]
    async fn fetch_edges(&self, statement: &Statement) -> StorageResult<Vec<EdgeRow>> {
        let rows: Vec<PgEdgeRow> = self.fetch(statement).await?;
        rows.into_iter().map(PgEdgeRow::into_edge_row).collect()
    }

    #[instrument(skip_all, fields(parts = statement.len()))]
    async fn fetch_counts(&self, statement: &Statement) -> StorageResult<Vec<CountRow>> {
        let rows: Vec<PgCountRow> = self.fetch(statement).await?;
        rows.into_iter().map(PgCountRow::into_count_row).collect()
    }

    #[instrument(skip_all, fields(parts = statement.len()))]
    async fn fetch_nodes(&self, statement: &Statement) -> StorageResult<Vec<Value>> {
        let rows: Vec<PgNodeRow> = self.fetch(statement).await?;
        Ok(rows.into_iter().map(|row| row.node).collect())
    }
}
