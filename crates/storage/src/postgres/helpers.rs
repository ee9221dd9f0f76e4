//! Shared helper functions for PostgreSQL parameter binding and row conversion.

use serde_json::Value;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::types::Json;

use folio_core::error::{StorageError, StorageResult};
use folio_core::query::{BatchKey, is_type_name};

/// Bind a JSON parameter with the closest PostgreSQL type.
///
/// Scalars bind natively (`bool`, `int8`, `float8`, `text`); arrays and
/// objects bind as `jsonb`. `null` binds as a `text` NULL. See
/// [`param_cast`] for text parameters compared against other types.
pub fn bind_value<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
    value: &'q Value,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(Json(other)),
    }
}

/// Cast needed for a parameter bound as `text`, given the type PostgreSQL
/// inferred for its placeholder.
///
/// Strings and nulls bind as `text`, which has no operators against
/// `timestamptz`, `uuid`, `int4` and most other column types. Casting the
/// placeholder to the inferred type restores the comparison.
pub fn param_cast(value: &Value, inferred: &str) -> Option<String> {
    let binds_as_text = matches!(value, Value::String(_) | Value::Null);
    let needs_cast = !inferred.eq_ignore_ascii_case("text") && !inferred.eq_ignore_ascii_case("unknown");
    (binds_as_text && needs_cast && is_type_name(inferred)).then(|| inferred.to_string())
}

/// Convert the `key` column back into a batch key.
pub fn batch_key(key: i32) -> StorageResult<BatchKey> {
    usize::try_from(key).map(BatchKey).map_err(|_| {
        StorageError::SerializationError(format!("key has invalid value: {key}"))
    })
}

/// Unpack the sort-key column, which holds a JSON array.
pub fn sort_key(value: Value, field_name: &str) -> StorageResult<Vec<Value>> {
    match value {
        Value::Array(values) => Ok(values),
        other => Err(StorageError::SerializationError(format!(
            "{field_name} is not an array: {other}"
        ))),
    }
}
