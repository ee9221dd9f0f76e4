//! Batched single-record loader.
//!
//! Loads records by a unique column, coalescing concurrent lookups into one
//! `WHERE "t1".<column> IN (...)` statement.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{LoaderError, LoaderResult};
use crate::keyset::{NameTransform, snake_case};
use crate::metrics::{self, StatementTimer};
use crate::ports::QueryExecutor;
use crate::query::{
    BatchKey, Expr, Identifier, Source, Statement, StatementKind, SubQuery, TABLE_ALIAS,
};
use crate::services::batcher::{BatchLoad, BatchOptions, Batcher};
use crate::services::connection_loader::decode_node;

/// Field injected into object records when a type name is configured.
pub const TYPENAME_FIELD: &str = "__typename";

/// Type name attached to loaded records.
#[derive(Clone)]
pub enum TypeName {
    /// The same name for every record.
    Static(String),
    /// Computed from the record.
    Derived(Arc<dyn Fn(&Value) -> String + Send + Sync>),
}

impl TypeName {
    pub fn resolve(&self, record: &Value) -> String {
        match self {
            Self::Static(name) => name.clone(),
            Self::Derived(derive) => derive(record),
        }
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(name) => f.debug_tuple("Static").field(name).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self::Static(name.to_string())
    }
}

/// Configuration for a node loader.
#[derive(Clone)]
pub struct NodeLoaderConfig {
    /// Unique field records are looked up by, before `column_names`.
    pub column: String,
    pub type_name: Option<TypeName>,
    pub cache: bool,
    pub batch_delay: Duration,
    pub max_batch_size: Option<usize>,
    /// Field name to column name mapping, applied to `column`.
    pub column_names: NameTransform,
}

impl Default for NodeLoaderConfig {
    fn default() -> Self {
        Self {
            column: "id".to_string(),
            type_name: None,
            cache: true,
            batch_delay: Duration::ZERO,
            max_batch_size: None,
            column_names: Arc::new(snake_case),
        }
    }
}

impl fmt::Debug for NodeLoaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLoaderConfig")
            .field("column", &self.column)
            .field("type_name", &self.type_name)
            .field("cache", &self.cache)
            .field("batch_delay", &self.batch_delay)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

/// Textual form of a key or column value, used for matching and caching.
fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Batch function resolving keys to records.
pub struct NodeBatch<T> {
    executor: Arc<dyn QueryExecutor>,
    source: Source,
    column: String,
    type_name: Option<TypeName>,
    _node: PhantomData<fn() -> T>,
}

impl<T> NodeBatch<T> {
    fn statement(&self, keys: &[Value]) -> Statement {
        let column = Expr::Column(Identifier::qualified(TABLE_ALIAS, self.column.as_str()));
        let mut statement = Statement::new(StatementKind::Nodes, self.source.clone());
        statement.push(SubQuery::new(
            BatchKey(0),
            column.in_list(keys.iter().cloned()),
        ));
        statement
    }

    fn tag(&self, mut record: Value) -> Value {
        if let Some(type_name) = &self.type_name {
            let name = type_name.resolve(&record);
            if let Value::Object(map) = &mut record {
                map.insert(TYPENAME_FIELD.to_string(), Value::String(name));
            }
        }
        record
    }
}

#[async_trait]
impl<T> BatchLoad for NodeBatch<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Key = Value;
    type Value = Option<T>;

    fn cache_key(&self, key: &Value) -> String {
        key_text(key)
    }

    #[instrument(skip_all, fields(keys = keys.len(), column = %self.column))]
    async fn load_batch(&self, keys: &[Value]) -> Vec<LoaderResult<Option<T>>> {
        let statement = self.statement(keys);

        let rows = {
            let _timer = StatementTimer::start(statement.kind);
            metrics::record_statement_executed(statement.kind);
            self.executor.fetch_nodes(&statement).await
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Nodes statement failed");
                metrics::record_statement_error(statement.kind);
                return vec![Err(LoaderError::from(e)); keys.len()];
            }
        };
        debug!(rows = rows.len(), "Fetched nodes");

        // First record wins when the column is not actually unique.
        let mut by_key: HashMap<String, Value> = HashMap::with_capacity(rows.len());
        for row in rows {
            let Some(value) = row.get(&self.column) else {
                continue;
            };
            by_key.entry(key_text(value)).or_insert(row);
        }

        let mut decoded: HashMap<String, T> = HashMap::with_capacity(by_key.len());
        for (key, row) in by_key {
            match decode_node(&statement, self.tag(row)) {
                Ok(node) => {
                    decoded.insert(key, node);
                }
                Err(e) => return vec![Err(e); keys.len()],
            }
        }

        keys.iter()
            .map(|key| Ok(decoded.get(&key_text(key)).cloned()))
            .collect()
    }
}

/// Loads single records by a unique column, batching concurrent lookups.
pub struct NodeLoader<T = Value>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    batcher: Batcher<NodeBatch<T>>,
}

impl<T> Clone for NodeLoader<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            batcher: self.batcher.clone(),
        }
    }
}

impl<T> NodeLoader<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(executor: Arc<dyn QueryExecutor>, source: Source, config: NodeLoaderConfig) -> Self {
        let options = BatchOptions {
            cache: config.cache,
            delay: config.batch_delay,
            max_batch_size: config.max_batch_size,
        };
        let batch = NodeBatch {
            executor,
            source,
            column: (config.column_names)(&config.column),
            type_name: config.type_name,
            _node: PhantomData,
        };
        Self {
            batcher: Batcher::new(batch, options),
        }
    }

    /// Load the record whose column equals `key`, if any.
    pub async fn load(&self, key: impl Into<Value>) -> LoaderResult<Option<T>> {
        self.batcher.load(key.into()).await
    }

    pub async fn load_many(&self, keys: Vec<Value>) -> Vec<LoaderResult<Option<T>>> {
        self.batcher.load_many(keys).await
    }

    pub fn clear(&self, key: &Value) {
        self.batcher.clear(key);
    }

    pub fn clear_all(&self) {
        self.batcher.clear_all();
    }
}
