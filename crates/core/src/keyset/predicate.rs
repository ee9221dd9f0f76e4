//! Keyset seek predicates.
//!
//! For order terms `c1..cn` with cursor values `v1..vn`, the rows strictly
//! after the cursor satisfy
//!
//! ```text
//! (c1 > v1)
//! OR (c1 = v1 AND c2 > v2)
//! OR ...
//! OR (c1 = v1 AND ... AND cn-1 = vn-1 AND cn > vn)
//! ```
//!
//! with `>` replaced by `<` for descending terms. Paging in reverse flips
//! every direction, so the same construction seeks backwards.

use serde_json::Value;

use crate::error::{CursorError, CursorResult};
use crate::ports::OrderDirection;
use crate::query::{CompareOp, Expr, OrderTerm};

/// Effective ordering and seek condition for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyset {
    /// Order terms with directions flipped for reverse paging.
    pub order_by: Vec<OrderTerm>,
    /// Present when the request carries a cursor.
    pub seek: Option<Expr>,
}

/// Build the keyset for `order_by`, optionally seeking past `cursor`.
pub fn build_keyset(
    order_by: &[OrderTerm],
    reverse: bool,
    cursor: Option<&[Value]>,
) -> CursorResult<Keyset> {
    let effective: Vec<OrderTerm> = order_by
        .iter()
        .map(|term| OrderTerm::new(term.expr.clone(), term.direction.flipped_if(reverse)))
        .collect();

    let seek = match cursor {
        None => None,
        Some(_) if effective.is_empty() => return Err(CursorError::Unordered),
        Some(values) if values.len() != effective.len() => {
            return Err(CursorError::ArityMismatch {
                expected: effective.len(),
                found: values.len(),
            });
        }
        Some(values) => Some(seek_predicate(&effective, values)),
    };

    Ok(Keyset {
        order_by: effective,
        seek,
    })
}

fn seek_predicate(terms: &[OrderTerm], values: &[Value]) -> Expr {
    Expr::any((0..terms.len()).map(|pivot| {
        Expr::all(terms[..=pivot].iter().zip(values).enumerate().map(
            |(index, (term, value))| {
                let op = if index < pivot {
                    CompareOp::Eq
                } else {
                    match term.direction {
                        OrderDirection::Asc => CompareOp::Gt,
                        OrderDirection::Desc => CompareOp::Lt,
                    }
                };
                term.expr.clone().compare(op, value.clone())
            },
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid() -> Expr {
        Expr::column("uid")
    }

    fn value() -> Expr {
        Expr::column("value")
    }

    #[test]
    fn test_no_cursor_no_seek() {
        let keyset = build_keyset(&[OrderTerm::asc(uid())], false, None).unwrap();
        assert_eq!(keyset.seek, None);
        assert_eq!(keyset.order_by, vec![OrderTerm::asc(uid())]);
    }

    #[test]
    fn test_single_column_seek() {
        let cursor = [json!("v")];
        let keyset = build_keyset(&[OrderTerm::asc(uid())], false, Some(&cursor[..])).unwrap();
        assert_eq!(keyset.seek, Some(uid().gt("v")));

        let keyset = build_keyset(&[OrderTerm::desc(uid())], false, Some(&cursor[..])).unwrap();
        assert_eq!(keyset.seek, Some(uid().lt("v")));
    }

    // Test critique: en sens inverse, les directions ET les comparaisons s'inversent
    #[test]
    fn test_reverse_flips_directions_and_operators() {
        let order = [OrderTerm::asc(value()), OrderTerm::asc(uid())];
        let cursor = [json!("ccc"), json!("v")];
        let keyset = build_keyset(&order, true, Some(&cursor[..])).unwrap();

        assert_eq!(
            keyset.order_by,
            vec![OrderTerm::desc(value()), OrderTerm::desc(uid())]
        );
        assert_eq!(
            keyset.seek,
            Some(Expr::Or(vec![
                value().lt("ccc"),
                Expr::And(vec![value().equals("ccc"), uid().lt("v")]),
            ]))
        );
    }

    #[test]
    fn test_mixed_directions() {
        let order = [
            OrderTerm::desc(value()),
            OrderTerm::asc(uid()),
            OrderTerm::asc(Expr::column("id")),
        ];
        let cursor = [json!("bbb"), json!("w"), json!(4)];
        let keyset = build_keyset(&order, false, Some(&cursor[..])).unwrap();

        assert_eq!(
            keyset.seek,
            Some(Expr::Or(vec![
                value().lt("bbb"),
                Expr::And(vec![value().equals("bbb"), uid().gt("w")]),
                Expr::And(vec![
                    value().equals("bbb"),
                    uid().equals("w"),
                    Expr::column("id").gt(4),
                ]),
            ]))
        );
    }

    #[test]
    fn test_cursor_arity_must_match() {
        let cursor = [json!("v")];
        let err = build_keyset(
            &[OrderTerm::asc(value()), OrderTerm::asc(uid())],
            false,
            Some(&cursor[..]),
        )
        .unwrap_err();
        assert_eq!(err, CursorError::ArityMismatch { expected: 2, found: 1 });
    }

    #[test]
    fn test_cursor_on_unordered_connection() {
        let cursor: [Value; 0] = [];
        assert_eq!(
            build_keyset(&[], false, Some(&cursor[..])).unwrap_err(),
            CursorError::Unordered
        );
        assert!(build_keyset(&[], true, None).unwrap().order_by.is_empty());
    }
}
