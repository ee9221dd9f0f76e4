//! PostgreSQL rendering of statements.
//!
//! Every sub-query is wrapped in parentheses so its own `ORDER BY` and
//! `LIMIT` survive the `UNION ALL`. Values are bound as `$n` parameters in
//! order of appearance; identifiers are always double quoted.

use std::fmt::Write as _;

use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::query::expr::{Expr, Identifier, SqlFragment};
use crate::query::statement::{
    SORT_COLUMN_ALIAS, Source, Statement, StatementKind, SubQuery, TABLE_ALIAS,
};

/// SQL text plus the values for its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Render a statement as one `UNION ALL` query.
pub fn render_statement(statement: &Statement) -> StorageResult<RenderedSql> {
    render_statement_with_casts(statement, &[])
}

/// Render a statement, wrapping parameters in `CAST($n AS <type>)`.
///
/// `casts[n - 1]` applies to `$n`; parameters past the end of `casts` stay
/// bare. Type names are plain identifiers with optional `[]` suffixes.
pub fn render_statement_with_casts(
    statement: &Statement,
    casts: &[Option<String>],
) -> StorageResult<RenderedSql> {
    if statement.is_empty() {
        return Err(StorageError::InvalidQuery(format!(
            "{} statement has no sub-queries",
            statement.kind
        )));
    }
    if let Some(bad) = casts.iter().flatten().find(|name| !is_type_name(name)) {
        return Err(StorageError::InvalidQuery(format!("invalid cast type {bad:?}")));
    }

    let mut writer = SqlWriter {
        casts,
        ..SqlWriter::default()
    };
    for (index, part) in statement.parts.iter().enumerate() {
        if index > 0 {
            writer.push(" UNION ALL ");
        }
        writer.push("(");
        writer.sub_query(statement.kind, &statement.source, part)?;
        writer.push(")");
    }
    Ok(writer.finish())
}

/// Render a standalone expression.
pub fn render_expr(expr: &Expr) -> StorageResult<RenderedSql> {
    let mut writer = SqlWriter::default();
    writer.expr(expr)?;
    Ok(writer.finish())
}

/// Whether `name` can be written as a cast target: `int4`,
/// `timestamp with time zone`, `text[]` and the like.
pub fn is_type_name(name: &str) -> bool {
    let base = name.trim_end_matches("[]");
    base.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
}

#[derive(Default)]
struct SqlWriter<'a> {
    sql: String,
    params: Vec<Value>,
    casts: &'a [Option<String>],
}

impl SqlWriter<'_> {
    fn finish(self) -> RenderedSql {
        RenderedSql {
            sql: self.sql,
            params: self.params,
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: &Value) {
        self.params.push(value.clone());
        let position = self.params.len();
        match self.casts.get(position - 1).and_then(Option::as_deref) {
            Some(cast) => {
                let _ = write!(self.sql, "CAST(${position} AS {cast})");
            }
            None => {
                let _ = write!(self.sql, "${position}");
            }
        }
    }

    fn quoted(&mut self, name: &str) {
        self.sql.push('"');
        self.sql.push_str(&name.replace('"', "\"\""));
        self.sql.push('"');
    }

    fn identifier(&mut self, identifier: &Identifier) {
        if let Some(qualifier) = &identifier.qualifier {
            self.quoted(qualifier);
            self.sql.push('.');
        }
        self.quoted(&identifier.name);
    }

    fn sub_query(
        &mut self,
        kind: StatementKind,
        source: &Source,
        part: &SubQuery,
    ) -> StorageResult<()> {
        let _ = write!(self.sql, "SELECT {} AS ", part.key);
        self.quoted("key");

        match kind {
            StatementKind::Edges => {
                self.node_column();
                self.push(", jsonb_build_array(");
                for (index, term) in part.order_by.iter().enumerate() {
                    if index > 0 {
                        self.push(", ");
                    }
                    self.expr(&term.expr)?;
                }
                self.push(") AS ");
                self.quoted(SORT_COLUMN_ALIAS);
            }
            StatementKind::Count => {
                self.push(", count(*) AS ");
                self.quoted("count");
            }
            StatementKind::Nodes => self.node_column(),
        }

        self.push(" FROM ");
        self.source(source)?;
        self.push(" WHERE ");
        self.expr(&part.filter)?;

        if kind == StatementKind::Edges {
            for (index, term) in part.order_by.iter().enumerate() {
                self.push(if index == 0 { " ORDER BY " } else { ", " });
                self.expr(&term.expr)?;
                self.push(" ");
                self.push(term.direction.as_sql());
            }
            if let Some(limit) = part.limit {
                let _ = write!(self.sql, " LIMIT {limit}");
            }
        }

        Ok(())
    }

    fn node_column(&mut self) {
        self.push(", to_jsonb(");
        self.quoted(TABLE_ALIAS);
        self.push(") AS ");
        self.quoted("node");
    }

    fn source(&mut self, source: &Source) -> StorageResult<()> {
        match source {
            Source::Table(identifier) => self.identifier(identifier),
            Source::Query(fragment) => {
                self.push("(");
                self.fragment(fragment)?;
                self.push(")");
            }
        }
        self.push(" AS ");
        self.quoted(TABLE_ALIAS);
        Ok(())
    }

    /// Copy a raw fragment, rebinding its `$n` placeholders.
    fn fragment(&mut self, fragment: &SqlFragment) -> StorageResult<()> {
        let sql = fragment.sql.as_str();
        let bytes = sql.as_bytes();
        let mut copied = 0;
        let mut index = 0;

        while index < bytes.len() {
            if bytes[index] != b'$' || !bytes.get(index + 1).is_some_and(u8::is_ascii_digit) {
                index += 1;
                continue;
            }

            let mut end = index + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }

            let position: usize = sql[index + 1..end].parse().map_err(|_| {
                StorageError::InvalidQuery(format!("bad placeholder {}", &sql[index..end]))
            })?;
            let value = position
                .checked_sub(1)
                .and_then(|offset| fragment.params.get(offset))
                .ok_or_else(|| {
                    StorageError::InvalidQuery(format!(
                        "placeholder ${position} has no parameter ({} supplied)",
                        fragment.params.len()
                    ))
                })?;

            self.sql.push_str(&sql[copied..index]);
            self.bind(value);
            copied = end;
            index = end;
        }

        self.sql.push_str(&sql[copied..]);
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> StorageResult<()> {
        match expr {
            Expr::True => self.push("TRUE"),
            Expr::Column(identifier) => self.identifier(identifier),
            Expr::Literal(value) => self.bind(value),
            Expr::Compare { left, op, right } => {
                self.operand(left)?;
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.operand(right)?;
            }
            Expr::And(terms) => self.junction(terms, " AND ", "TRUE")?,
            Expr::Or(terms) => self.junction(terms, " OR ", "FALSE")?,
            Expr::Not(inner) => {
                self.push("NOT ");
                self.operand(inner)?;
            }
            Expr::IsNull(inner) => {
                self.operand(inner)?;
                self.push(" IS NULL");
            }
            Expr::InList { expr, values } => {
                if values.is_empty() {
                    self.push("FALSE");
                } else {
                    self.operand(expr)?;
                    self.push(" IN (");
                    for (index, value) in values.iter().enumerate() {
                        if index > 0 {
                            self.push(", ");
                        }
                        self.bind(value);
                    }
                    self.push(")");
                }
            }
            Expr::Call { function, args } => {
                self.push(function.as_sql());
                self.push("(");
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        self.push(", ");
                    }
                    self.expr(arg)?;
                }
                self.push(")");
            }
            Expr::Raw(fragment) => {
                self.push("(");
                self.fragment(fragment)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn junction(&mut self, terms: &[Expr], separator: &str, empty: &str) -> StorageResult<()> {
        match terms {
            [] => self.push(empty),
            [only] => self.expr(only)?,
            _ => {
                self.push("(");
                for (index, term) in terms.iter().enumerate() {
                    if index > 0 {
                        self.push(separator);
                    }
                    self.expr(term)?;
                }
                self.push(")");
            }
        }
        Ok(())
    }

    fn operand(&mut self, expr: &Expr) -> StorageResult<()> {
        let needs_parens = matches!(
            expr,
            Expr::Compare { .. } | Expr::Not(_) | Expr::IsNull(_) | Expr::InList { .. }
        );
        if needs_parens {
            self.push("(");
            self.expr(expr)?;
            self.push(")");
        } else {
            self.expr(expr)?;
        }
        Ok(())
    }
}
