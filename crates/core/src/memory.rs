//! In-memory query executor.
//!
//! Evaluates statements over JSON rows with PostgreSQL semantics for the
//! parts of the query AST that tests and fixtures need: three-valued logic,
//! `NULLS LAST` ascending / `NULLS FIRST` descending ordering, and the
//! built-in functions. Raw SQL fragments and sub-query sources are not
//! supported.
//!
//! Every statement is recorded, which makes the executor handy for
//! asserting how many round trips a batch took.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};
use crate::ports::{CountRow, EdgeRow, OrderDirection, QueryExecutor};
use crate::query::{Expr, Function, OrderTerm, Source, Statement, StatementKind};

type Row = Map<String, Value>;

/// Executor over named in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    tables: HashMap<String, Vec<Row>>,
    history: Mutex<Vec<(StatementKind, usize)>>,
    failing: Mutex<HashSet<StatementKind>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Rows that are not JSON objects are ignored.
    pub fn with_table(mut self, name: impl Into<String>, rows: impl IntoIterator<Item = Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.tables.insert(name.into(), rows);
        self
    }

    /// Statements executed so far as `(kind, sub-query count)`.
    pub fn history(&self) -> Vec<(StatementKind, usize)> {
        self.history.lock().clone()
    }

    /// Number of statements of `kind` executed so far.
    pub fn executions(&self, kind: StatementKind) -> usize {
        self.history.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Make every later statement of `kind` fail.
    pub fn fail(&self, kind: StatementKind) {
        self.failing.lock().insert(kind);
    }

    fn begin(&self, statement: &Statement) -> StorageResult<&[Row]> {
        self.history.lock().push((statement.kind, statement.len()));

        if self.failing.lock().contains(&statement.kind) {
            return Err(StorageError::QueryError(format!(
                "{} statement failed",
                statement.kind
            )));
        }

        match &statement.source {
            Source::Table(identifier) => self
                .tables
                .get(&identifier.name)
                .map(Vec::as_slice)
                .ok_or_else(|| {
                    StorageError::QueryError(format!(
                        "relation \"{}\" does not exist",
                        identifier.name
                    ))
                }),
            Source::Query(_) => Err(StorageError::Unsupported("sub-query sources".into())),
        }
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn fetch_edges(&self, statement: &Statement) -> StorageResult<Vec<EdgeRow>> {
        let rows = self.begin(statement)?;
        let mut out = Vec::new();

        for part in &statement.parts {
            let mut matched = Vec::new();
            for row in rows {
                if matches(&part.filter, row)? {
                    let sort_key = part
                        .order_by
                        .iter()
                        .map(|term| eval(&term.expr, row))
                        .collect::<StorageResult<Vec<_>>>()?;
                    matched.push((sort_key, row));
                }
            }

            matched.sort_by(|(a, _), (b, _)| compare_sort_keys(a, b, &part.order_by));

            let limit = part.limit.map_or(matched.len(), |limit| {
                usize::try_from(limit).unwrap_or(usize::MAX)
            });
            out.extend(matched.into_iter().take(limit).map(|(sort_key, row)| EdgeRow {
                key: part.key,
                node: Value::Object(row.clone()),
                sort_key,
            }));
        }

        Ok(out)
    }

    async fn fetch_counts(&self, statement: &Statement) -> StorageResult<Vec<CountRow>> {
        let rows = self.begin(statement)?;
        let mut out = Vec::with_capacity(statement.len());

        for part in &statement.parts {
            let mut count = 0;
            for row in rows {
                if matches(&part.filter, row)? {
                    count += 1;
                }
            }
            out.push(CountRow {
                key: part.key,
                count,
            });
        }

        Ok(out)
    }

    async fn fetch_nodes(&self, statement: &Statement) -> StorageResult<Vec<Value>> {
        let rows = self.begin(statement)?;
        let mut out = Vec::new();

        for part in &statement.parts {
            for row in rows {
                if matches(&part.filter, row)? {
                    out.push(Value::Object(row.clone()));
                }
            }
        }

        Ok(out)
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn matches(filter: &Expr, row: &Row) -> StorageResult<bool> {
    match eval(filter, row)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(type_error("WHERE", &other)),
    }
}

fn eval(expr: &Expr, row: &Row) -> StorageResult<Value> {
    match expr {
        Expr::True => Ok(Value::Bool(true)),
        Expr::Column(identifier) => Ok(row.get(&identifier.name).cloned().unwrap_or(Value::Null)),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Compare { left, op, right } => {
            let left = eval(left, row)?;
            let right = eval(right, row)?;
            Ok(match compare(&left, &right)? {
                Some(ordering) => Value::Bool(op.holds(ordering)),
                None => Value::Null,
            })
        }
        Expr::And(terms) => {
            let mut unknown = false;
            for term in terms {
                match eval(term, row)? {
                    Value::Bool(false) => return Ok(Value::Bool(false)),
                    Value::Bool(true) => {}
                    Value::Null => unknown = true,
                    other => return Err(type_error("AND", &other)),
                }
            }
            Ok(if unknown { Value::Null } else { Value::Bool(true) })
        }
        Expr::Or(terms) => {
            let mut unknown = false;
            for term in terms {
                match eval(term, row)? {
                    Value::Bool(true) => return Ok(Value::Bool(true)),
                    Value::Bool(false) => {}
                    Value::Null => unknown = true,
                    other => return Err(type_error("OR", &other)),
                }
            }
            Ok(if unknown { Value::Null } else { Value::Bool(false) })
        }
        Expr::Not(inner) => match eval(inner, row)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Null => Ok(Value::Null),
            other => Err(type_error("NOT", &other)),
        },
        Expr::IsNull(inner) => Ok(Value::Bool(eval(inner, row)?.is_null())),
        Expr::InList { expr, values } => {
            let value = eval(expr, row)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            for candidate in values {
                if compare(&value, candidate)? == Some(Ordering::Equal) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, row))
                .collect::<StorageResult<Vec<_>>>()?;
            call(*function, args)
        }
        Expr::Raw(_) => Err(StorageError::Unsupported("raw SQL fragments".into())),
    }
}

fn call(function: Function, args: Vec<Value>) -> StorageResult<Value> {
    if function == Function::Coalesce {
        return Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null));
    }

    let [arg] = <[Value; 1]>::try_from(args).map_err(|args| {
        StorageError::QueryError(format!(
            "function {}() takes 1 argument, got {}",
            function.as_sql(),
            args.len()
        ))
    })?;

    match (function, arg) {
        (_, Value::Null) => Ok(Value::Null),
        (Function::Upper, Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        (Function::Lower, Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        (Function::Length, Value::String(s)) => Ok(Value::from(s.chars().count())),
        (Function::Abs, Value::Number(n)) => Ok(match n.as_i64().and_then(i64::checked_abs) {
            Some(i) => Value::from(i),
            None => Value::from(n.as_f64().map_or(0.0, f64::abs)),
        }),
        (function, other) => Err(StorageError::QueryError(format!(
            "function {}() does not accept {other}",
            function.as_sql()
        ))),
    }
}

/// SQL comparison: `None` when either side is NULL.
fn compare(left: &Value, right: &Value) -> StorageResult<Option<Ordering>> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::Number(a), Value::Number(b)) => Ok(match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        }),
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        _ => Err(StorageError::QueryError(format!(
            "cannot compare {left} with {right}"
        ))),
    }
}

fn compare_sort_keys(a: &[Value], b: &[Value], order_by: &[OrderTerm]) -> Ordering {
    for ((a, b), term) in a.iter().zip(b).zip(order_by) {
        // NULL sorts as the largest value, like PostgreSQL's default.
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare(a, b).ok().flatten().unwrap_or(Ordering::Equal),
        };
        let ordering = match term.direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn type_error(context: &str, value: &Value) -> StorageError {
    StorageError::QueryError(format!("argument of {context} must be boolean, got {value}"))
}

/// The nine-row `test_table_bar` fixture used across the loader tests.
#[cfg(test)]
pub(crate) fn bar_table() -> MemoryExecutor {
    use serde_json::json;

    MemoryExecutor::new().with_table(
        "test_table_bar",
        [
            json!({ "id": 1, "uid": "z", "value": "aaa" }),
            json!({ "id": 2, "uid": "y", "value": "aaa" }),
            json!({ "id": 3, "uid": "x", "value": "bbb" }),
            json!({ "id": 4, "uid": "w", "value": "bbb" }),
            json!({ "id": 5, "uid": "v", "value": "ccc" }),
            json!({ "id": 6, "uid": "u", "value": "ccc" }),
            json!({ "id": 7, "uid": "t", "value": "ddd" }),
            json!({ "id": 8, "uid": "s", "value": "ddd" }),
            json!({ "id": 9, "uid": "r", "value": "eee" }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BatchKey, SubQuery};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    // Test critique: logique à trois valeurs comme PostgreSQL
    #[test]
    fn test_null_comparisons_are_unknown() {
        let r = row(json!({ "a": null, "b": 1 }));
        let a = Expr::column("a");
        let b = Expr::column("b");

        assert_eq!(eval(&a.clone().equals(1), &r).unwrap(), Value::Null);
        assert!(!matches(&a.clone().equals(1).negate(), &r).unwrap());
        assert!(matches(&a.clone().equals(1).or(b.clone().equals(1)), &r).unwrap());
        assert_eq!(
            eval(&a.clone().equals(1).and(b.equals(1)), &r).unwrap(),
            Value::Null
        );
        assert!(matches(&a.is_null(), &r).unwrap());
    }

    #[test]
    fn test_functions() {
        let r = row(json!({ "s": "Ab", "n": -3, "z": null }));
        assert_eq!(eval(&Expr::column("s").upper(), &r).unwrap(), json!("AB"));
        assert_eq!(eval(&Expr::column("s").lower(), &r).unwrap(), json!("ab"));
        assert_eq!(eval(&Expr::column("s").length(), &r).unwrap(), json!(2));
        assert_eq!(eval(&Expr::column("n").abs(), &r).unwrap(), json!(3));
        assert_eq!(eval(&Expr::column("z").upper(), &r).unwrap(), Value::Null);
        assert_eq!(
            eval(&Expr::coalesce([Expr::column("z"), Expr::value("x")]), &r).unwrap(),
            json!("x")
        );
        assert!(eval(&Expr::column("n").upper(), &r).is_err());
    }

    #[test]
    fn test_nulls_sort_last_ascending_first_descending() {
        let keys = [vec![json!(2)], vec![Value::Null], vec![json!(1)]];
        let asc = [OrderTerm::asc(Expr::column("a"))];
        let desc = [OrderTerm::desc(Expr::column("a"))];

        let mut sorted = keys.to_vec();
        sorted.sort_by(|a, b| compare_sort_keys(a, b, &asc));
        assert_eq!(sorted, vec![vec![json!(1)], vec![json!(2)], vec![Value::Null]]);

        sorted.sort_by(|a, b| compare_sort_keys(a, b, &desc));
        assert_eq!(sorted, vec![vec![Value::Null], vec![json!(2)], vec![json!(1)]]);
    }

    #[tokio::test]
    async fn test_statements_are_recorded() {
        let executor = bar_table();
        let mut statement = Statement::new(StatementKind::Count, Source::table("test_table_bar"));
        statement.push(SubQuery::new(BatchKey(0), Expr::True));
        statement.push(SubQuery::new(BatchKey(1), Expr::column("value").equals("aaa")));

        let counts = executor.fetch_counts(&statement).await.unwrap();
        assert_eq!(
            counts,
            vec![
                CountRow { key: BatchKey(0), count: 9 },
                CountRow { key: BatchKey(1), count: 2 },
            ]
        );
        assert_eq!(executor.history(), vec![(StatementKind::Count, 2)]);
    }

    #[tokio::test]
    async fn test_unknown_table_and_injected_failure() {
        let executor = bar_table();
        let mut missing = Statement::new(StatementKind::Nodes, Source::table("nope"));
        missing.push(SubQuery::new(BatchKey(0), Expr::True));
        assert!(executor.fetch_nodes(&missing).await.is_err());

        executor.fail(StatementKind::Edges);
        let mut edges = Statement::new(StatementKind::Edges, Source::table("test_table_bar"));
        edges.push(SubQuery::new(BatchKey(0), Expr::True));
        assert!(matches!(
            executor.fetch_edges(&edges).await,
            Err(StorageError::QueryError(_))
        ));
        assert_eq!(executor.executions(StatementKind::Edges), 1);
    }
}
