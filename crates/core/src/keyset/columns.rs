//! Column identifier resolution.
//!
//! Callers name fields the way their API does (`createdAt`); the resolver
//! maps them to qualified column expressions (`"t1"."created_at"`).

use std::fmt;
use std::sync::Arc;

use convert_case::{Case, Casing};

use crate::query::{Expr, Identifier, TABLE_ALIAS};

/// Maps a field name to a column name.
pub type NameTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The default field-to-column mapping.
pub fn snake_case(field: &str) -> String {
    field.to_case(Case::Snake)
}

/// Resolves field names to columns of the loader's source.
#[derive(Clone)]
pub struct ColumnIdentifiers {
    table_alias: String,
    transform: NameTransform,
}

impl ColumnIdentifiers {
    /// Resolve against `alias`, snake-casing field names.
    pub fn new(table_alias: impl Into<String>) -> Self {
        Self::with_transform(table_alias, Arc::new(snake_case))
    }

    pub fn with_transform(table_alias: impl Into<String>, transform: NameTransform) -> Self {
        Self {
            table_alias: table_alias.into(),
            transform,
        }
    }

    pub fn table_alias(&self) -> &str {
        &self.table_alias
    }

    pub fn column_name(&self, field: &str) -> String {
        (self.transform)(field)
    }

    pub fn identifier(&self, field: &str) -> Identifier {
        Identifier::qualified(self.table_alias.clone(), self.column_name(field))
    }

    /// Column expression for `field`.
    pub fn get(&self, field: &str) -> Expr {
        Expr::Column(self.identifier(field))
    }
}

impl Default for ColumnIdentifiers {
    fn default() -> Self {
        Self::new(TABLE_ALIAS)
    }
}

impl fmt::Debug for ColumnIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnIdentifiers")
            .field("table_alias", &self.table_alias)
            .finish_non_exhaustive()
    }
}
