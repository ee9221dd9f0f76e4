//! Pagination requests.

use serde::Serialize;

use crate::keyset::columns::ColumnIdentifiers;
use crate::keyset::selection::{RequestedFields, SubQueryNeeds};
use crate::ports::Cursor;
use crate::query::{Expr, OrderTerm};

/// One caller's request for a page of a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaginationRequest {
    /// Sort key of the row to seek past.
    pub cursor: Option<Cursor>,
    /// Page size; unbounded when absent.
    pub limit: Option<u64>,
    /// Page backwards from the cursor.
    pub reverse: bool,
    pub order_by: Vec<OrderTerm>,
    pub filter: Option<Expr>,
    /// Fields the caller will read; loader defaults apply when absent.
    pub requested_fields: Option<RequestedFields>,
}

impl PaginationRequest {
    /// The cursor, unless absent or empty.
    pub fn active_cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref().filter(|cursor| !cursor.value.is_empty())
    }

    pub fn needs(&self, defaults: &RequestedFields) -> SubQueryNeeds {
        SubQueryNeeds::resolve(self.requested_fields.as_ref(), defaults)
    }

    /// Identity of this request for memoization.
    ///
    /// Two requests with the same key resolve to the same connection.
    pub fn cache_key(&self, defaults: &RequestedFields) -> String {
        #[derive(Serialize)]
        struct CacheKey<'a> {
            cursor: Option<&'a str>,
            reverse: bool,
            limit: Option<u64>,
            order_by: &'a [OrderTerm],
            filter: Option<&'a Expr>,
            fields: &'a RequestedFields,
        }

        let key = CacheKey {
            cursor: self.active_cursor().map(Cursor::as_str),
            reverse: self.reverse,
            limit: self.limit,
            order_by: &self.order_by,
            filter: self.filter.as_ref(),
            fields: self.requested_fields.as_ref().unwrap_or(defaults),
        };
        serde_json::to_string(&key).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Builds a [`PaginationRequest`], resolving field names through the
/// loader's column identifiers.
///
/// ```
/// use folio_core::keyset::{ColumnIdentifiers, RequestBuilder};
/// use folio_core::query::OrderTerm;
///
/// let columns = ColumnIdentifiers::default();
/// let request = RequestBuilder::new(&columns)
///     .limit(4)
///     .order_by(|c| vec![OrderTerm::asc(c.get("value")), OrderTerm::asc(c.get("uid"))])
///     .filter(|c| c.get("value").upper().equals("EEE"))
///     .build();
/// assert_eq!(request.order_by.len(), 2);
/// ```
#[derive(Debug)]
pub struct RequestBuilder<'a> {
    columns: &'a ColumnIdentifiers,
    request: PaginationRequest,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(columns: &'a ColumnIdentifiers) -> Self {
        Self {
            columns,
            request: PaginationRequest::default(),
        }
    }

    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.request.cursor = cursor;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.request.limit = Some(limit);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.request.reverse = reverse;
        self
    }

    pub fn order_by<F>(mut self, order_by: F) -> Self
    where
        F: FnOnce(&ColumnIdentifiers) -> Vec<OrderTerm>,
    {
        self.request.order_by = order_by(self.columns);
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: FnOnce(&ColumnIdentifiers) -> Expr,
    {
        self.request.filter = Some(filter(self.columns));
        self
    }

    pub fn fields(mut self, fields: RequestedFields) -> Self {
        self.request.requested_fields = Some(fields);
        self
    }

    pub fn build(self) -> PaginationRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::selection::COUNT;

    fn request(columns: &ColumnIdentifiers) -> RequestBuilder<'_> {
        RequestBuilder::new(columns)
            .limit(4)
            .order_by(|c| vec![OrderTerm::asc(c.get("uid"))])
    }

    #[test]
    fn test_empty_cursor_counts_as_absent() {
        let columns = ColumnIdentifiers::default();
        let built = request(&columns).cursor(Some(Cursor::new(""))).build();
        assert!(built.active_cursor().is_none());
    }

    // Test critique: la clé de cache distingue tout ce qui change le résultat
    #[test]
    fn test_cache_key_covers_every_input() {
        let columns = ColumnIdentifiers::default();
        let defaults = RequestedFields::edges_and_page_info();
        let base = request(&columns).build().cache_key(&defaults);

        assert_eq!(request(&columns).build().cache_key(&defaults), base);
        assert_ne!(request(&columns).reverse(true).build().cache_key(&defaults), base);
        assert_ne!(request(&columns).limit(5).build().cache_key(&defaults), base);
        assert_ne!(
            request(&columns)
                .cursor(Some(Cursor::encode(&["v".into()])))
                .build()
                .cache_key(&defaults),
            base
        );
        assert_ne!(
            request(&columns)
                .filter(|c| c.get("id").gt(1))
                .build()
                .cache_key(&defaults),
            base
        );
        assert_ne!(
            request(&columns)
                .fields(RequestedFields::new().with(COUNT))
                .build()
                .cache_key(&defaults),
            base
        );
    }

    #[test]
    fn test_explicit_default_fields_share_cache_key() {
        let columns = ColumnIdentifiers::default();
        let defaults = RequestedFields::edges_and_page_info();
        let implicit = request(&columns).build();
        let explicit = request(&columns).fields(defaults.clone()).build();
        assert_eq!(implicit.cache_key(&defaults), explicit.cache_key(&defaults));
    }
}
