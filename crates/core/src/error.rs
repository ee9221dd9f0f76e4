//! Error types for the pagination core.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`CursorError`] - A client supplied cursor could not be used
//! - [`StorageError`] - Executor/database errors
//! - [`LoaderError`] - What a caller of a loader receives
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! Every type here is `Clone`: one failed statement is fanned out to
//! every caller whose request was part of it.

use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Cursor Errors
// =============================================================================

/// A cursor that cannot be turned into a seek predicate.
///
/// Cursor errors are scoped to the request that carried the cursor;
/// other requests in the same batch are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The token is not base64 or does not hold a JSON array.
    #[error("Malformed cursor: {0}")]
    Malformed(String),

    /// The decoded sort key does not line up with the requested order.
    #[error("Cursor holds {found} sort values but the connection is ordered by {expected}")]
    ArityMismatch {
        /// Number of order-by terms on the request.
        expected: usize,
        /// Number of values decoded from the cursor.
        found: usize,
    },

    /// A cursor was supplied for a connection without an order.
    #[error("Cursor supplied for a connection without an order")]
    Unordered,
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Executor and database errors.
///
/// These errors originate from rendering and running statements and from
/// converting the rows that come back.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// The statement could not be rendered (bad raw fragment, etc.).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Row data could not be converted.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The executor cannot run this kind of expression or source.
    #[error("Unsupported by this executor: {0}")]
    Unsupported(String),
}

// =============================================================================
// Loader Errors
// =============================================================================

/// Error delivered to a caller of a connection or node loader.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    /// The request's cursor was unusable.
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),

    /// The statement the request depended on failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A returned row did not match the node schema.
    ///
    /// Carries the rendered SQL and the offending row so the failure can be
    /// reproduced.
    #[error("Row does not match the node schema: {issues}")]
    SchemaValidation {
        /// Rendered SQL text of the statement that produced the row.
        query: String,
        /// The row as returned by the executor.
        row: Value,
        /// Validation failure description.
        issues: String,
    },

    /// The batch function broke its contract of one result per key.
    #[error("Batch returned {returned} results for {expected} keys")]
    BatchSizeMismatch {
        /// Number of keys submitted.
        expected: usize,
        /// Number of results returned.
        returned: usize,
    },

    /// The batch was dropped before producing a result for this key.
    #[error("Batch was dropped before it resolved")]
    Dropped,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for cursor decoding and seek construction.
pub type CursorResult<T> = Result<T, CursorError>;
