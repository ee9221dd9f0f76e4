//! Core domain layer for Folio.
//!
//! This crate contains the query description, the keyset pagination logic
//! and the batching loaders. It follows hexagonal architecture principles:
//! it is the innermost layer and never talks to a database itself. Storage
//! adapters implement [`ports::QueryExecutor`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       folio (binary)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │        folio-graphql          │        folio-storage        │
//! │     (API, field selection)    │   (PostgreSQL executor)     │
//! ├───────────────────────────────┴─────────────────────────────┤
//! │                    folio-core  ← YOU ARE HERE               │
//! │          (query AST, keyset, loaders, executor port)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`query`] - Query description AST and PostgreSQL rendering
//! - [`keyset`] - Cursors, seek predicates, batch composition and demultiplexing
//! - [`services`] - Batching loaders (connections and single nodes)
//! - [`ports`] - Connection types and the executor trait
//! - [`memory`] - In-memory executor
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Request Lifecycle
//!
//! 1. A caller builds a [`keyset::PaginationRequest`] and calls
//!    [`services::ConnectionLoader::load`]
//! 2. Requests issued in the same scheduling window join one batch
//! 3. The batch is composed into one edges and one count statement, each a
//!    `UNION ALL` of sub-queries tagged with the request's batch key
//! 4. The executor runs each statement in one round trip
//! 5. Rows are routed back by batch key and shaped into connections

pub mod error;
pub mod keyset;
pub mod memory;
pub mod metrics;
pub mod ports;
pub mod query;
pub mod services;
