//! Query AST and PostgreSQL rendering.
//!
//! - [`expr`] - Expression trees for filters, order terms and seek predicates
//! - [`statement`] - Batched statements of tagged sub-queries
//! - [`render`] - Rendering to SQL text with positional parameters

pub mod expr;
pub mod render;
pub mod statement;

pub use expr::{CompareOp, Expr, Function, Identifier, SqlFragment};
pub use render::{
    RenderedSql, is_type_name, render_expr, render_statement, render_statement_with_casts,
};
pub use statement::{
    BatchKey, OrderTerm, SORT_COLUMN_ALIAS, Source, Statement, StatementKind, SubQuery,
    TABLE_ALIAS,
};
