//! Storage layer for Folio.
//!
//! This crate provides the PostgreSQL implementation of the executor port
//! defined in `folio-core`. It handles connection pooling, parameter
//! binding and row conversion; statement text comes from the core renderer.
//!
//! # Usage
//!
//! ```ignore
//! use folio_core::query::Source;
//! use folio_core::services::ConnectionLoader;
//! use folio_storage::{Database, DatabaseConfig, PgExecutor};
//!
//! let db = Database::connect(&DatabaseConfig::for_graphql(&database_url)).await?;
//! let executor = Arc::new(PgExecutor::from_database(&db));
//!
//! let loader: ConnectionLoader = ConnectionLoader::new(executor, Source::table("records"));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgExecutor};
