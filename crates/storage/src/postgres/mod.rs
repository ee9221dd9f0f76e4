//! PostgreSQL storage adapter.
//!
//! This module implements the `QueryExecutor` port defined in `folio-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool management
//! - [`PgExecutor`] - Renders statements and runs each in one round trip
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_graphql(&database_url);
//! let db = Database::connect(&config).await?;
//!
//! let executor = Arc::new(PgExecutor::from_database(&db));
//! ```

mod database;
mod executor;
mod helpers;

pub use database::{Database, DatabaseConfig};
pub use executor::PgExecutor;
