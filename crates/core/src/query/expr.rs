//! Composable SQL expressions.
//!
//! Filters, order-by terms and seek predicates are all [`Expr`] trees.
//! Values never appear in SQL text: [`Expr::Literal`] is rendered as a
//! positional parameter.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

/// A possibly qualified SQL identifier (`"t1"."uid"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifier {
    pub qualifier: Option<String>,
    pub name: String,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    /// Parse `schema.table` or `table`.
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((qualifier, name)) => Self::qualified(qualifier, name),
            None => Self::new(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    /// Whether `left op right` holds given `left.cmp(right)`.
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }
}

/// SQL functions usable in filters and order-by terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Upper,
    Lower,
    Length,
    Abs,
    Coalesce,
}

impl Function {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Length => "length",
            Self::Abs => "abs",
            Self::Coalesce => "coalesce",
        }
    }
}

/// Hand written SQL with its own `$1..$n` placeholders.
///
/// Placeholders are renumbered when the fragment is embedded in a larger
/// statement, so fragments can be written as if they stood alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A SQL expression tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// The constant `TRUE`.
    True,
    Column(Identifier),
    /// A bound value.
    Literal(Value),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    InList {
        expr: Box<Expr>,
        values: Vec<Value>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    Raw(SqlFragment),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(Identifier::new(name))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Raw(SqlFragment::new(sql, params))
    }

    pub fn compare(self, op: CompareOp, right: impl Into<Expr>) -> Self {
        Self::Compare {
            left: Box::new(self),
            op,
            right: Box::new(right.into()),
        }
    }

    pub fn equals(self, right: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Eq, right)
    }

    pub fn not_equals(self, right: impl Into<Expr>) -> Self {
        self.compare(CompareOp::NotEq, right)
    }

    pub fn lt(self, right: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Lt, right)
    }

    pub fn lte(self, right: impl Into<Expr>) -> Self {
        self.compare(CompareOp::LtEq, right)
    }

    pub fn gt(self, right: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Gt, right)
    }

    pub fn gte(self, right: impl Into<Expr>) -> Self {
        self.compare(CompareOp::GtEq, right)
    }

    /// Conjunction of `self` and `other`, flattening nested `AND`s.
    pub fn and(self, other: Expr) -> Self {
        Self::all([self, other])
    }

    /// Disjunction of `self` and `other`, flattening nested `OR`s.
    pub fn or(self, other: Expr) -> Self {
        Self::any([self, other])
    }

    /// `AND` over all expressions. An empty conjunction is `TRUE`.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut terms = Vec::new();
        for expr in exprs {
            match expr {
                Self::True => {}
                Self::And(nested) => terms.extend(nested),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Self::True,
            1 => terms.remove(0),
            _ => Self::And(terms),
        }
    }

    /// `OR` over all expressions. An empty disjunction is `FALSE`.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut terms = Vec::new();
        for expr in exprs {
            match expr {
                Self::Or(nested) => terms.extend(nested),
                other => terms.push(other),
            }
        }
        match terms.len() {
            1 => terms.remove(0),
            _ => Self::Or(terms),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Self::IsNull(Box::new(self))
    }

    pub fn in_list(self, values: impl IntoIterator<Item = Value>) -> Self {
        Self::InList {
            expr: Box::new(self),
            values: values.into_iter().collect(),
        }
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Self::Call { function, args }
    }

    pub fn upper(self) -> Self {
        Self::call(Function::Upper, vec![self])
    }

    pub fn lower(self) -> Self {
        Self::call(Function::Lower, vec![self])
    }

    pub fn length(self) -> Self {
        Self::call(Function::Length, vec![self])
    }

    pub fn abs(self) -> Self {
        Self::call(Function::Abs, vec![self])
    }

    pub fn coalesce(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Self::call(Function::Coalesce, exprs.into_iter().collect())
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Self::Literal(Value::from(value))
    }
}
