//! GraphQL API for Folio.
//!
//! Exposes a loader's source as a Relay connection and serves it over HTTP.
//! The connection field reads its own selection set, so a query selecting
//! only `count` never fetches edges.
//!
//! # Serving
//!
//! Every HTTP request runs with a fork of the template loader held in
//! [`AppState`], so requests issued while resolving one GraphQL document
//! share a batch and nothing is memoized across documents.
//!
//! ```ignore
//! use folio_graphql::{AppState, ServerConfig, build_schema, serve};
//!
//! let loader: ConnectionLoader = ConnectionLoader::new(executor, Source::table("records"));
//! serve(AppState::new(build_schema(), loader), ServerConfig::default()).await?;
//! ```
//!
//! # Merging with other query roots
//!
//! ```ignore
//! use async_graphql::MergedObject;
//! use folio_graphql::{build_schema_with_query, RecordsQuery};
//!
//! #[derive(MergedObject, Default)]
//! struct Query(RecordsQuery, AccountsQuery);
//!
//! let schema = build_schema_with_query(Query::default());
//! ```

mod schema;
mod selection;
mod server;
mod types;

pub use schema::{
    Comparison, DEFAULT_PAGE_SIZE, FieldFilterInput, MAX_PAGE_SIZE, MAX_QUERY_COMPLEXITY,
    MAX_QUERY_DEPTH, Order, OrderByInput, PageInfo, RecordConnection, RecordEdge, RecordsQuery,
    build_schema, build_schema_with_query, schema_builder,
};
pub use selection::requested_fields;
pub use server::{AppState, ServerConfig, router, serve, serve_with_shutdown};
pub use types::FolioSchema;
