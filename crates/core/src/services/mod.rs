//! Loader services.
//!
//! - [`batcher`] - Generic request coalescing and memoization
//! - [`connection_loader`] - Paginated connections over a source
//! - [`node_loader`] - Single records by a unique column

pub mod batcher;
pub mod connection_loader;
pub mod node_loader;

pub use batcher::{BatchLoad, BatchOptions, Batcher};
pub use connection_loader::{ConnectionBatch, ConnectionLoader, LoaderConfig};
pub use node_loader::{NodeBatch, NodeLoader, NodeLoaderConfig, TYPENAME_FIELD, TypeName};
