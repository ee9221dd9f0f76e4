//! GraphQL schema definition.
//!
//! This module provides a generic `records` connection over the loader's
//! source, plus the Relay output types shared by connection fields.

use async_graphql::{
    Context, EmptyMutation, EmptySubscription, InputObject, Json, Object, Result, Schema,
    SchemaBuilder,
};
use serde_json::Value;

use folio_core::ports::{Cursor, OrderDirection};
use folio_core::query::{CompareOp, Expr, OrderTerm};
use folio_core::services::ConnectionLoader;

use crate::selection::requested_fields;
use crate::types::FolioSchema;

// -----------------------------------------------------------------------------
// Schema Configuration
// -----------------------------------------------------------------------------

/// Maximum query depth to prevent deeply nested queries (DoS protection).
/// Note: GraphQL introspection requires depth ~13, so we use 15 to allow it.
pub const MAX_QUERY_DEPTH: usize = 15;

/// Maximum query complexity score (DoS protection).
pub const MAX_QUERY_COMPLEXITY: usize = 500;

/// Page size when `limit` is omitted.
pub const DEFAULT_PAGE_SIZE: i32 = 20;
/// Largest accepted `limit`.
pub const MAX_PAGE_SIZE: i32 = 100;

/// Maximum length of a field name in `orderBy` or `filter`.
const MAX_FIELD_NAME_LENGTH: usize = 63;

// -----------------------------------------------------------------------------
// Schema Builder
// -----------------------------------------------------------------------------

/// Build the schema with the `records` query.
///
/// The schema holds no loader: attach a fresh [`ConnectionLoader`] to every
/// request so memoization stays request-scoped.
pub fn build_schema() -> FolioSchema {
    build_schema_with_query(RecordsQuery)
}

/// Create a schema builder for [`RecordsQuery`].
///
/// Remember to call `.limit_depth()` and `.limit_complexity()` before `.finish()`.
pub fn schema_builder() -> SchemaBuilder<RecordsQuery, EmptyMutation, EmptySubscription> {
    Schema::build(RecordsQuery, EmptyMutation, EmptySubscription)
}

/// Build a schema with a merged query type.
///
/// Includes query depth and complexity limits for DoS protection.
pub fn build_schema_with_query<Q>(query: Q) -> Schema<Q, EmptyMutation, EmptySubscription>
where
    Q: async_graphql::ObjectType + 'static,
{
    Schema::build(query, EmptyMutation, EmptySubscription)
        .limit_depth(MAX_QUERY_DEPTH)
        .limit_complexity(MAX_QUERY_COMPLEXITY)
        .finish()
}

// -----------------------------------------------------------------------------
// Records Query
// -----------------------------------------------------------------------------

/// Query root exposing the loader's source as a connection.
///
/// Can be merged with other query roots using `#[derive(MergedObject)]`.
#[derive(Default)]
pub struct RecordsQuery;

#[Object]
impl RecordsQuery {
    /// Page through records.
    ///
    /// Pass `pageInfo.endCursor` as `cursor` for the next page. With
    /// `reverse`, pass `pageInfo.startCursor` to walk backwards.
    async fn records<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        #[graphql(default_with = "Some(DEFAULT_PAGE_SIZE)")] limit: Option<i32>,
        cursor: Option<String>,
        #[graphql(default)] reverse: bool,
        #[graphql(default)] order_by: Vec<OrderByInput>,
        #[graphql(default)] filter: Vec<FieldFilterInput>,
    ) -> Result<RecordConnection> {
        for name in order_by
            .iter()
            .map(|term| &term.field)
            .chain(filter.iter().map(|f| &f.field))
        {
            validate_field_name(name)?;
        }

        let loader = ctx.data::<ConnectionLoader>()?;

        let request = loader
            .request()
            .cursor(cursor.map(Cursor::from))
            .limit(validate_page_size(limit))
            .reverse(reverse)
            .order_by(|c| {
                order_by
                    .iter()
                    .map(|term| OrderTerm::new(c.get(&term.field), term.direction.into()))
                    .collect()
            })
            .filter(|c| {
                Expr::all(filter.iter().map(|f| {
                    c.get(&f.field).compare(f.op.into(), f.value.0.clone())
                }))
            })
            .fields(requested_fields(ctx))
            .build();

        let connection = loader.load(request).await?;
        Ok(RecordConnection::from(connection))
    }
}

// -----------------------------------------------------------------------------
// Input Types
// -----------------------------------------------------------------------------

/// Ordering direction.
#[derive(async_graphql::Enum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl From<Order> for OrderDirection {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => OrderDirection::Asc,
            Order::Desc => OrderDirection::Desc,
        }
    }
}

/// Comparison applied by a filter.
#[derive(async_graphql::Enum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Comparison {
    #[default]
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl From<Comparison> for CompareOp {
    fn from(comparison: Comparison) -> Self {
        match comparison {
            Comparison::Eq => CompareOp::Eq,
            Comparison::NotEq => CompareOp::NotEq,
            Comparison::Lt => CompareOp::Lt,
            Comparison::Lte => CompareOp::LtEq,
            Comparison::Gt => CompareOp::Gt,
            Comparison::Gte => CompareOp::GtEq,
        }
    }
}

/// One `orderBy` term.
#[derive(InputObject, Debug, Clone)]
pub struct OrderByInput {
    pub field: String,
    #[graphql(default)]
    pub direction: Order,
}

/// One filter condition; conditions are combined with `AND`.
#[derive(InputObject, Debug, Clone)]
pub struct FieldFilterInput {
    pub field: String,
    #[graphql(default)]
    pub op: Comparison,
    pub value: Json<Value>,
}

// -----------------------------------------------------------------------------
// Connection Types (Relay-style pagination)
// -----------------------------------------------------------------------------

#[derive(async_graphql::SimpleObject, Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

impl From<folio_core::ports::PageInfo> for PageInfo {
    fn from(info: folio_core::ports::PageInfo) -> Self {
        Self {
            has_next_page: info.has_next_page,
            has_previous_page: info.has_previous_page,
            start_cursor: info.start_cursor.map(|c| c.value),
            end_cursor: info.end_cursor.map(|c| c.value),
        }
    }
}

/// Generate Relay-style connection types (Edge + Connection) with From impl.
macro_rules! define_connection {
    ($node:ty, $core_model:ty, $edge:ident, $connection:ident) => {
        #[derive(async_graphql::SimpleObject)]
        pub struct $edge {
            pub node: $node,
            pub cursor: String,
        }

        #[derive(async_graphql::SimpleObject)]
        pub struct $connection {
            pub edges: Vec<$edge>,
            pub page_info: PageInfo,
            /// Rows matching the filter, ignoring cursor and limit.
            pub count: i64,
        }

        impl From<folio_core::ports::Connection<$core_model>> for $connection {
            fn from(conn: folio_core::ports::Connection<$core_model>) -> Self {
                Self {
                    edges: conn
                        .edges
                        .into_iter()
                        .map(|e| $edge {
                            node: <$node>::from(e.node),
                            cursor: e.cursor.value,
                        })
                        .collect(),
                    page_info: PageInfo::from(conn.page_info),
                    count: conn.count,
                }
            }
        }
    };
}

define_connection!(Json<Value>, Value, RecordEdge, RecordConnection);

// -----------------------------------------------------------------------------
// Helpers & Validation
// -----------------------------------------------------------------------------

/// Validate a field name used in `orderBy` or `filter`.
fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(async_graphql::Error::new("field cannot be empty"));
    }
    if name.len() > MAX_FIELD_NAME_LENGTH {
        return Err(async_graphql::Error::new(format!(
            "field too long: maximum {} characters allowed",
            MAX_FIELD_NAME_LENGTH
        )));
    }
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(async_graphql::Error::new(format!(
            "Invalid field name: {name}"
        )));
    }
    Ok(())
}

/// Validate and normalize the `limit` argument.
fn validate_page_size(limit: Option<i32>) -> u64 {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(0, MAX_PAGE_SIZE);
    u64::try_from(limit).unwrap_or_default()
}
