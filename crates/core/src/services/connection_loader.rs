//! Batched connection loader.
//!
//! [`ConnectionLoader`] is the front door for paginated reads: every
//! [`PaginationRequest`] issued during one scheduling window is composed
//! into at most one edges statement and one count statement, executed, and
//! split back into one [`Connection`] per caller.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{LoaderError, LoaderResult};
use crate::keyset::{
    ColumnIdentifiers, NameTransform, PaginationRequest, RequestBuilder, RequestedFields,
    compose_batch, demultiplex, snake_case,
};
use crate::metrics::{self, StatementTimer};
use crate::ports::{Connection, CountRow, EdgeRow, QueryExecutor};
use crate::query::{Source, Statement, TABLE_ALIAS, render_statement};
use crate::services::batcher::{BatchLoad, BatchOptions, Batcher};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a connection loader.
#[derive(Clone)]
pub struct LoaderConfig {
    /// Fields assumed requested when a request does not say.
    pub default_fields: RequestedFields,
    /// Memoize identical requests.
    pub cache: bool,
    /// How long to collect requests before dispatching.
    pub batch_delay: Duration,
    /// Upper bound on requests per statement.
    pub max_batch_size: Option<usize>,
    /// Maps API field names to column names.
    pub column_names: NameTransform,
}

impl LoaderConfig {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            cache: self.cache,
            delay: self.batch_delay,
            max_batch_size: self.max_batch_size,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_fields: RequestedFields::edges_and_page_info(),
            cache: true,
            batch_delay: Duration::ZERO,
            max_batch_size: None,
            column_names: Arc::new(snake_case),
        }
    }
}

impl fmt::Debug for LoaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("default_fields", &self.default_fields)
            .field("cache", &self.cache)
            .field("batch_delay", &self.batch_delay)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Batch function
// =============================================================================

/// Batch function resolving pagination requests against one source.
pub struct ConnectionBatch<T> {
    executor: Arc<dyn QueryExecutor>,
    source: Source,
    default_fields: RequestedFields,
    _node: PhantomData<fn() -> T>,
}

impl<T> Clone for ConnectionBatch<T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            source: self.source.clone(),
            default_fields: self.default_fields.clone(),
            _node: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> ConnectionBatch<T> {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        source: Source,
        default_fields: RequestedFields,
    ) -> Self {
        Self {
            executor,
            source,
            default_fields,
            _node: PhantomData,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    #[instrument(skip_all, fields(kind = %statement.kind, parts = statement.len()))]
    async fn fetch_edges(&self, statement: &Statement) -> LoaderResult<Vec<EdgeRow<T>>> {
        if statement.is_empty() {
            debug!("No request needs edges, skipping statement");
            metrics::record_statement_skipped(statement.kind);
            return Ok(Vec::new());
        }

        let rows = {
            let _timer = StatementTimer::start(statement.kind);
            metrics::record_statement_executed(statement.kind);
            self.executor.fetch_edges(statement).await
        };
        let rows = rows.map_err(|e| {
            warn!(error = %e, "Edges statement failed");
            metrics::record_statement_error(statement.kind);
            LoaderError::from(e)
        })?;

        rows.into_iter()
            .map(|row| -> LoaderResult<EdgeRow<T>> {
                Ok(EdgeRow {
                    key: row.key,
                    node: decode_node(statement, row.node)?,
                    sort_key: row.sort_key,
                })
            })
            .collect()
    }

    #[instrument(skip_all, fields(kind = %statement.kind, parts = statement.len()))]
    async fn fetch_counts(&self, statement: &Statement) -> LoaderResult<Vec<CountRow>> {
        if statement.is_empty() {
            debug!("No request needs a count, skipping statement");
            metrics::record_statement_skipped(statement.kind);
            return Ok(Vec::new());
        }

        let rows = {
            let _timer = StatementTimer::start(statement.kind);
            metrics::record_statement_executed(statement.kind);
            self.executor.fetch_counts(statement).await
        };
        rows.map_err(|e| {
            warn!(error = %e, "Count statement failed");
            metrics::record_statement_error(statement.kind);
            LoaderError::from(e)
        })
    }
}

#[async_trait]
impl<T> BatchLoad for ConnectionBatch<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Key = PaginationRequest;
    type Value = Connection<T>;

    fn cache_key(&self, key: &PaginationRequest) -> String {
        key.cache_key(&self.default_fields)
    }

    #[instrument(skip_all, fields(requests = keys.len()))]
    async fn load_batch(&self, keys: &[PaginationRequest]) -> Vec<LoaderResult<Connection<T>>> {
        let plan = compose_batch(&self.source, keys, &self.default_fields);

        let (edges, counts) = tokio::join!(
            self.fetch_edges(&plan.edges),
            self.fetch_counts(&plan.counts)
        );

        demultiplex(plan.requests, edges, counts)
    }
}

/// Validate a raw row against the node type.
pub(crate) fn decode_node<T: DeserializeOwned>(
    statement: &Statement,
    node: Value,
) -> LoaderResult<T> {
    T::deserialize(&node).map_err(|e| {
        warn!(error = %e, "Row does not match the node schema");
        LoaderError::SchemaValidation {
            query: render_statement(statement)
                .map(|rendered| rendered.sql)
                .unwrap_or_default(),
            row: node.clone(),
            issues: e.to_string(),
        }
    })
}

// =============================================================================
// ConnectionLoader
// =============================================================================

/// Loads paginated connections over one source, batching concurrent
/// requests.
///
/// A loader memoizes results for its whole lifetime; create one per unit of
/// work (see [`ConnectionLoader::fork`]).
pub struct ConnectionLoader<T = Value>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    batcher: Batcher<ConnectionBatch<T>>,
    columns: ColumnIdentifiers,
    config: LoaderConfig,
}

impl<T> Clone for ConnectionLoader<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            batcher: self.batcher.clone(),
            columns: self.columns.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> ConnectionLoader<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(executor: Arc<dyn QueryExecutor>, source: Source) -> Self {
        Self::with_config(executor, source, LoaderConfig::default())
    }

    pub fn with_config(
        executor: Arc<dyn QueryExecutor>,
        source: Source,
        config: LoaderConfig,
    ) -> Self {
        let batch = ConnectionBatch::new(executor, source, config.default_fields.clone());
        Self {
            batcher: Batcher::new(batch, config.batch_options()),
            columns: ColumnIdentifiers::with_transform(
                TABLE_ALIAS,
                Arc::clone(&config.column_names),
            ),
            config,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Column resolver handed to `order_by` and `filter` callbacks.
    pub fn columns(&self) -> &ColumnIdentifiers {
        &self.columns
    }

    /// Start building a request against this loader's columns.
    pub fn request(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(&self.columns)
    }

    /// Load one page. Concurrent calls share a batch.
    pub async fn load(&self, request: PaginationRequest) -> LoaderResult<Connection<T>> {
        self.batcher.load(request).await
    }

    pub async fn load_many(
        &self,
        requests: Vec<PaginationRequest>,
    ) -> Vec<LoaderResult<Connection<T>>> {
        self.batcher.load_many(requests).await
    }

    pub fn clear(&self, request: &PaginationRequest) {
        self.batcher.clear(request);
    }

    pub fn clear_all(&self) {
        self.batcher.clear_all();
    }

    /// A loader over the same source and executor with an empty cache.
    pub fn fork(&self) -> Self {
        Self {
            batcher: Batcher::new(self.batcher.loader().clone(), self.config.batch_options()),
            columns: self.columns.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> fmt::Debug for ConnectionLoader<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLoader")
            .field("source", self.batcher.loader().source())
            .field("columns", &self.columns)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CursorError, StorageError};
    use crate::keyset::{COUNT, EDGES, PAGE_INFO};
    use crate::memory::{MemoryExecutor, bar_table};
    use crate::ports::Cursor;
    use crate::query::{OrderTerm, StatementKind};
    use serde::{Deserialize, Serialize};

    fn setup() -> (Arc<MemoryExecutor>, ConnectionLoader) {
        let executor = Arc::new(bar_table());
        let loader = ConnectionLoader::new(executor.clone(), Source::table("test_table_bar"));
        (executor, loader)
    }

    fn ids<T: Serialize>(page: &Connection<T>) -> Vec<i64> {
        page.nodes()
            .filter_map(|node| serde_json::to_value(node).ok())
            .filter_map(|node| node["id"].as_i64())
            .collect()
    }

    fn by_uid(c: &ColumnIdentifiers) -> Vec<OrderTerm> {
        vec![OrderTerm::asc(c.get("uid"))]
    }

    fn by_value_then_uid(c: &ColumnIdentifiers) -> Vec<OrderTerm> {
        vec![OrderTerm::asc(c.get("value")), OrderTerm::asc(c.get("uid"))]
    }

    // Test critique: la pagination avant parcourt toutes les lignes sans répétition
    #[tokio::test]
    async fn test_forward_pagination() {
        let (_, loader) = setup();
        let page = |cursor: Option<Cursor>| {
            loader
                .request()
                .cursor(cursor)
                .limit(4)
                .order_by(by_uid)
                .build()
        };

        let first = loader.load(page(None)).await.unwrap();
        assert_eq!(ids(&first), vec![9, 8, 7, 6]);
        assert!(first.page_info.has_next_page);
        assert!(!first.page_info.has_previous_page);

        let second = loader.load(page(first.page_info.end_cursor.clone())).await.unwrap();
        assert_eq!(ids(&second), vec![5, 4, 3, 2]);
        assert!(second.page_info.has_next_page);
        assert!(second.page_info.has_previous_page);

        let third = loader.load(page(second.page_info.end_cursor.clone())).await.unwrap();
        assert_eq!(ids(&third), vec![1]);
        assert!(!third.page_info.has_next_page);
        assert!(third.page_info.has_previous_page);

        let past_end = loader.load(page(third.page_info.end_cursor.clone())).await.unwrap();
        assert!(past_end.edges.is_empty());
        assert!(past_end.page_info.has_previous_page);
        assert!(!past_end.page_info.has_next_page);
        assert_eq!(past_end.page_info.start_cursor, None);
        assert_eq!(past_end.page_info.end_cursor, None);
    }

    // Test critique: la pagination arrière reconstruit l'ordre avant
    #[tokio::test]
    async fn test_backward_pagination() {
        let (_, loader) = setup();
        let page = |cursor: Option<Cursor>| {
            loader
                .request()
                .cursor(cursor)
                .limit(4)
                .reverse(true)
                .order_by(by_value_then_uid)
                .build()
        };

        let first = loader.load(page(None)).await.unwrap();
        assert_eq!(ids(&first), vec![5, 8, 7, 9]);
        assert!(first.page_info.has_previous_page);
        assert!(!first.page_info.has_next_page);
        assert_eq!(first.page_info.start_cursor, Some(first.edges[0].cursor.clone()));
        assert_eq!(first.page_info.end_cursor, Some(first.edges[3].cursor.clone()));

        let second = loader.load(page(first.page_info.start_cursor.clone())).await.unwrap();
        assert_eq!(ids(&second), vec![1, 4, 3, 6]);
        assert!(second.page_info.has_previous_page);
        assert!(second.page_info.has_next_page);

        let third = loader.load(page(second.page_info.start_cursor.clone())).await.unwrap();
        assert_eq!(ids(&third), vec![2]);
        assert!(!third.page_info.has_previous_page);
        assert!(third.page_info.has_next_page);

        let past_start = loader.load(page(third.page_info.start_cursor.clone())).await.unwrap();
        assert!(past_start.edges.is_empty());
        assert!(!past_start.page_info.has_previous_page);
        assert!(past_start.page_info.has_next_page);
    }

    #[tokio::test]
    async fn test_descending_and_function_orders() {
        let (_, loader) = setup();

        let desc = loader
            .load(
                loader
                    .request()
                    .order_by(|c| vec![OrderTerm::desc(c.get("value")), OrderTerm::desc(c.get("uid"))])
                    .build(),
            )
            .await
            .unwrap();
        let desc_ids = ids(&desc);
        assert_eq!(desc_ids.len(), 9);
        assert_eq!(desc_ids.first(), Some(&9));
        assert_eq!(desc_ids.last(), Some(&2));

        let upper = loader
            .load(
                loader
                    .request()
                    .order_by(|c| vec![OrderTerm::asc(c.get("uid").upper())])
                    .build(),
            )
            .await
            .unwrap();
        let upper_ids = ids(&upper);
        assert_eq!(upper_ids.first(), Some(&9));
        assert_eq!(upper_ids.last(), Some(&1));
    }

    #[tokio::test]
    async fn test_filter_and_count() {
        let (_, loader) = setup();

        let filtered = loader
            .load(
                loader
                    .request()
                    .filter(|c| c.get("value").upper().equals("EEE"))
                    .fields(RequestedFields::all())
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&filtered), vec![9]);
        assert_eq!(filtered.count, 1);

        // The count ignores the cursor.
        let first = loader
            .load(loader.request().limit(2).order_by(by_uid).build())
            .await
            .unwrap();
        let second = loader
            .load(
                loader
                    .request()
                    .cursor(first.page_info.end_cursor.clone())
                    .limit(2)
                    .order_by(by_uid)
                    .fields(RequestedFields::all())
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(second.count, 9);
        assert_eq!(first.count, 0);
    }

    #[tokio::test]
    async fn test_empty_cursor_is_ignored() {
        let (_, loader) = setup();
        let page = loader
            .load(
                loader
                    .request()
                    .cursor(Some(Cursor::new("")))
                    .limit(4)
                    .order_by(by_uid)
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&page), vec![9, 8, 7, 6]);
        assert!(!page.page_info.has_previous_page);
    }

    // Test critique: des requêtes concurrentes partagent une seule exécution
    #[tokio::test]
    async fn test_concurrent_requests_share_statements() {
        let (executor, loader) = setup();

        let (a, b, c) = tokio::join!(
            loader.load(loader.request().limit(2).order_by(by_uid).build()),
            loader.load(
                loader
                    .request()
                    .limit(3)
                    .order_by(by_value_then_uid)
                    .fields(RequestedFields::all())
                    .build()
            ),
            loader.load(
                loader
                    .request()
                    .filter(|c| c.get("value").equals("aaa"))
                    .fields(RequestedFields::new().with(COUNT))
                    .build()
            ),
        );

        assert_eq!(ids(&a.unwrap()), vec![9, 8]);
        let b = b.unwrap();
        assert_eq!(ids(&b), vec![2, 1, 4]);
        assert_eq!(b.count, 9);
        let c = c.unwrap();
        assert!(c.edges.is_empty());
        assert_eq!(c.count, 2);

        assert_eq!(
            executor.history(),
            vec![(StatementKind::Edges, 2), (StatementKind::Count, 2)]
        );
    }

    #[tokio::test]
    async fn test_field_selection_skips_statements() {
        let (executor, loader) = setup();

        let count_only = loader
            .load(loader.request().fields(RequestedFields::new().with(COUNT)).build())
            .await
            .unwrap();
        assert_eq!(count_only.count, 9);
        assert_eq!(executor.executions(StatementKind::Edges), 0);

        let edges_only = loader
            .load(loader.request().fields(RequestedFields::new().with(EDGES)).build())
            .await
            .unwrap();
        assert_eq!(edges_only.edges.len(), 9);
        assert_eq!(executor.executions(StatementKind::Count), 1);
        assert_eq!(executor.executions(StatementKind::Edges), 1);

        let page_info_only = loader
            .load(
                loader
                    .request()
                    .limit(1)
                    .fields(RequestedFields::new().with(PAGE_INFO))
                    .build(),
            )
            .await
            .unwrap();
        assert!(page_info_only.page_info.has_next_page);
        assert_eq!(executor.executions(StatementKind::Edges), 2);
    }

    #[tokio::test]
    async fn test_identical_requests_are_memoized() {
        let (executor, loader) = setup();
        let request = || loader.request().limit(4).order_by(by_uid).build();

        let (a, b) = tokio::join!(loader.load(request()), loader.load(request()));
        assert_eq!(a.unwrap(), b.unwrap());
        loader.load(request()).await.unwrap();
        assert_eq!(executor.executions(StatementKind::Edges), 1);

        let forked = loader.fork();
        forked.load(request()).await.unwrap();
        assert_eq!(executor.executions(StatementKind::Edges), 2);

        loader.clear_all();
        loader.load(request()).await.unwrap();
        assert_eq!(executor.executions(StatementKind::Edges), 3);
    }

    #[tokio::test]
    async fn test_cache_disabled_executes_each_request() {
        let executor = Arc::new(bar_table());
        let config = LoaderConfig {
            cache: false,
            ..LoaderConfig::default()
        };
        let loader: ConnectionLoader =
            ConnectionLoader::with_config(executor.clone(), Source::table("test_table_bar"), config);

        loader.load(loader.request().build()).await.unwrap();
        loader.load(loader.request().build()).await.unwrap();
        assert_eq!(executor.executions(StatementKind::Edges), 2);
    }

    // Test critique: l'échec des edges n'affecte pas les appelants count seul
    #[tokio::test]
    async fn test_edges_failure_spares_count_only_callers() {
        let (executor, loader) = setup();
        executor.fail(StatementKind::Edges);

        let (edges, count) = tokio::join!(
            loader.load(loader.request().build()),
            loader.load(loader.request().fields(RequestedFields::new().with(COUNT)).build()),
        );

        assert!(matches!(
            edges,
            Err(LoaderError::Storage(StorageError::QueryError(_)))
        ));
        assert_eq!(count.unwrap().count, 9);
    }

    #[tokio::test]
    async fn test_bad_cursor_fails_only_its_request() {
        let (executor, loader) = setup();

        let (malformed, unordered, fine) = tokio::join!(
            loader.load(
                loader
                    .request()
                    .cursor(Some(Cursor::new("not a cursor")))
                    .order_by(by_uid)
                    .build()
            ),
            loader.load(
                loader
                    .request()
                    .cursor(Some(Cursor::encode(&[serde_json::json!("r")])))
                    .build()
            ),
            loader.load(loader.request().limit(1).order_by(by_uid).build()),
        );

        assert!(matches!(
            malformed,
            Err(LoaderError::Cursor(CursorError::Malformed(_)))
        ));
        assert_eq!(unordered, Err(LoaderError::Cursor(CursorError::Unordered)));
        assert_eq!(ids(&fine.unwrap()), vec![9]);
        assert_eq!(executor.history(), vec![(StatementKind::Edges, 1)]);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Bar {
        id: i64,
        uid: String,
        value: String,
    }

    #[tokio::test]
    async fn test_typed_nodes() {
        let executor = Arc::new(bar_table());
        let loader: ConnectionLoader<Bar> =
            ConnectionLoader::new(executor, Source::table("test_table_bar"));

        let page = loader
            .load(
                loader
                    .request()
                    .filter(|c| c.get("id").equals(3))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(
            page.nodes().cloned().collect::<Vec<_>>(),
            vec![Bar {
                id: 3,
                uid: "x".into(),
                value: "bbb".into(),
            }]
        );
    }

    #[derive(Debug, Clone, Deserialize)]
    #[allow(dead_code)]
    struct Strict {
        id: String,
    }

    #[tokio::test]
    async fn test_schema_validation_reports_query_and_row() {
        let executor = Arc::new(bar_table());
        let loader: ConnectionLoader<Strict> =
            ConnectionLoader::new(executor, Source::table("test_table_bar"));

        let err = loader
            .load(loader.request().limit(1).order_by(by_uid).build())
            .await
            .unwrap_err();

        match err {
            LoaderError::SchemaValidation { query, row, issues } => {
                assert!(query.contains("FROM \"test_table_bar\" AS \"t1\""));
                assert_eq!(row["id"], 9);
                assert!(!issues.is_empty());
            }
            other => panic!("expected a schema validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.default_fields, RequestedFields::edges_and_page_info());
        assert!(config.cache);
        assert_eq!((config.column_names)("createdAt"), "created_at");
    }
}
