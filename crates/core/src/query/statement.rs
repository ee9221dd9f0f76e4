//! Batched statements.
//!
//! A [`Statement`] is the unit of one database round trip: a list of
//! sub-queries over the same source, each tagged with a [`BatchKey`],
//! combined with `UNION ALL`.

use std::fmt;

use serde::Serialize;

use crate::ports::OrderDirection;
use crate::query::expr::{Expr, Identifier, SqlFragment};

/// Alias under which the source is visible to every expression.
pub const TABLE_ALIAS: &str = "t1";

/// Column alias carrying the sort key of an edges row.
pub const SORT_COLUMN_ALIAS: &str = "s1";

/// Position of a request within its batch.
///
/// Rendered into each sub-query as a literal so rows of the combined
/// result can be routed back to their request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BatchKey(pub usize);

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the loaders read from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Source {
    /// A table or view, optionally schema qualified.
    Table(Identifier),
    /// An arbitrary sub-query; its columns are what nodes contain.
    Query(SqlFragment),
}

impl Source {
    /// A table source. `schema.table` is split into a qualified name.
    pub fn table(name: &str) -> Self {
        Self::Table(Identifier::parse(name))
    }

    pub fn query(sql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self::Query(SqlFragment::new(sql, params))
    }
}

/// One term of an `ORDER BY` clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTerm {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl OrderTerm {
    pub fn new(expr: Expr, direction: OrderDirection) -> Self {
        Self { expr, direction }
    }

    pub fn asc(expr: Expr) -> Self {
        Self::new(expr, OrderDirection::Asc)
    }

    pub fn desc(expr: Expr) -> Self {
        Self::new(expr, OrderDirection::Desc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Rows with their sort keys.
    Edges,
    /// One count per sub-query.
    Count,
    /// Rows looked up by key.
    Nodes,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edges => "edges",
            Self::Count => "count",
            Self::Nodes => "nodes",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request's share of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub key: BatchKey,
    pub filter: Expr,
    /// Ignored by count statements.
    pub order_by: Vec<OrderTerm>,
    /// Ignored by count statements.
    pub limit: Option<u64>,
}

impl SubQuery {
    pub fn new(key: BatchKey, filter: Expr) -> Self {
        Self {
            key,
            filter,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn order_by(mut self, order_by: Vec<OrderTerm>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }
}

/// Sub-queries of one kind over one source, run as a single round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub source: Source,
    pub parts: Vec<SubQuery>,
}

impl Statement {
    pub fn new(kind: StatementKind, source: Source) -> Self {
        Self {
            kind,
            source,
            parts: Vec::new(),
        }
    }

    pub fn push(&mut self, part: SubQuery) {
        self.parts.push(part);
    }

    /// A statement with no parts must not be sent to the database.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }
}
