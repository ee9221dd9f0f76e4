//! Requested-field analysis.
//!
//! A connection request may say which of `edges`, `pageInfo` and `count`
//! its caller will read. Sub-queries nobody needs are never built.

use std::collections::BTreeSet;

use serde::Serialize;

pub const EDGES: &str = "edges";
pub const PAGE_INFO: &str = "pageInfo";
pub const COUNT: &str = "count";

/// Top-level connection fields a caller will read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestedFields(BTreeSet<String>);

impl RequestedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// `edges` and `pageInfo`, without the count.
    pub fn edges_and_page_info() -> Self {
        [EDGES, PAGE_INFO].into_iter().collect()
    }

    pub fn all() -> Self {
        [EDGES, PAGE_INFO, COUNT].into_iter().collect()
    }

    pub fn with(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into());
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Which sub-queries these fields require.
    pub fn needs(&self) -> SubQueryNeeds {
        SubQueryNeeds {
            edges: self.contains(EDGES) || self.contains(PAGE_INFO),
            count: self.contains(COUNT),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for RequestedFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Sub-queries one request contributes to a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubQueryNeeds {
    pub edges: bool,
    pub count: bool,
}

impl SubQueryNeeds {
    /// Resolve against `defaults` when the caller gave no field list.
    pub fn resolve(requested: Option<&RequestedFields>, defaults: &RequestedFields) -> Self {
        requested.unwrap_or(defaults).needs()
    }

    pub fn any(self) -> bool {
        self.edges || self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: pageInfo seul exige quand même la requête edges
    #[test]
    fn test_page_info_alone_needs_edges() {
        let needs = RequestedFields::new().with(PAGE_INFO).needs();
        assert_eq!(needs, SubQueryNeeds { edges: true, count: false });
    }

    #[test]
    fn test_count_alone_skips_edges() {
        let needs = RequestedFields::new().with(COUNT).needs();
        assert_eq!(needs, SubQueryNeeds { edges: false, count: true });
    }

    #[test]
    fn test_unrelated_fields_need_nothing() {
        let needs = RequestedFields::new().with("__typename").needs();
        assert!(!needs.any());
    }

    #[test]
    fn test_defaults_apply_only_without_explicit_fields() {
        let defaults = RequestedFields::edges_and_page_info();
        assert_eq!(
            SubQueryNeeds::resolve(None, &defaults),
            SubQueryNeeds { edges: true, count: false }
        );

        let explicit = RequestedFields::new().with(COUNT);
        assert_eq!(
            SubQueryNeeds::resolve(Some(&explicit), &defaults),
            SubQueryNeeds { edges: false, count: true }
        );
    }
}
