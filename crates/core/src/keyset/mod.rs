//! Keyset pagination.
//!
//! - [`cursor`] - Cursor encoding of sort keys
//! - [`columns`] - Field name to column resolution
//! - [`selection`] - Which sub-queries a request needs
//! - [`request`] - Pagination requests and their builder
//! - [`predicate`] - Seek predicates and effective ordering
//! - [`compose`] - Batch composition into statements
//! - [`demux`] - Routing rows back into connections

pub mod columns;
pub mod compose;
pub mod cursor;
pub mod demux;
pub mod predicate;
pub mod request;
pub mod selection;

pub use columns::{ColumnIdentifiers, NameTransform, snake_case};
pub use compose::{BatchPlan, PlannedRequest, compose_batch};
pub use demux::{demultiplex, paginate};
pub use predicate::{Keyset, build_keyset};
pub use request::{PaginationRequest, RequestBuilder};
pub use selection::{COUNT, EDGES, PAGE_INFO, RequestedFields, SubQueryNeeds};
