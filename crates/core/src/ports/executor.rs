//! Query executor trait.
//!
//! An executor runs one composed [`Statement`] in a single round trip and
//! returns its rows tagged with the batch key of the sub-query that
//! produced them. The loaders never talk to a database directly.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;
use crate::query::{BatchKey, Statement};

/// A row of an edges statement.
///
/// `node` starts out as the raw JSON row and becomes the caller's node type
/// once validated.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow<T = Value> {
    /// Which sub-query of the batch produced this row.
    pub key: BatchKey,
    /// The full row.
    pub node: T,
    /// The row's values for the order-by expressions, in order.
    pub sort_key: Vec<Value>,
}

/// A row of a count statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRow {
    pub key: BatchKey,
    pub count: i64,
}

/// Runs composed statements against a backing store.
///
/// Implementations must run the whole statement as one round trip; the
/// batching guarantees of the loaders rest on it.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run an edges statement.
    async fn fetch_edges(&self, statement: &Statement) -> StorageResult<Vec<EdgeRow>>;

    /// Run a count statement. Sub-queries matching no rows still yield a row.
    async fn fetch_counts(&self, statement: &Statement) -> StorageResult<Vec<CountRow>>;

    /// Run a nodes statement, returning each row as a JSON object.
    async fn fetch_nodes(&self, statement: &Statement) -> StorageResult<Vec<Value>>;
}
