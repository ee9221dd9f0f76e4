//! Field-selection extraction.

use async_graphql::Context;

use folio_core::keyset::RequestedFields;

/// Top-level fields selected on the current field, fragments expanded.
///
/// For a connection field this yields some of `edges`, `pageInfo` and
/// `count`, which is what decides the sub-queries a request runs.
pub fn requested_fields(ctx: &Context<'_>) -> RequestedFields {
    ctx.field()
        .selection_set()
        .map(|field| field.name())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema, SimpleObject};
    use serde_json::json;

    #[derive(SimpleObject)]
    struct Probe {
        edges: Vec<String>,
        page_info: bool,
        count: i64,
    }

    struct Query;

    #[Object]
    impl Query {
        async fn probe(&self, ctx: &Context<'_>) -> Probe {
            Probe {
                edges: requested_fields(ctx).iter().map(str::to_string).collect(),
                page_info: true,
                count: 0,
            }
        }
    }

    async fn selected(query: &str) -> serde_json::Value {
        let schema = Schema::new(Query, EmptyMutation, EmptySubscription);
        let response = schema.execute(query).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        response.data.into_json().unwrap()["probe"]["edges"].clone()
    }

    #[tokio::test]
    async fn test_direct_selection() {
        assert_eq!(
            selected("{ probe { edges count } }").await,
            json!(["count", "edges"])
        );
        assert_eq!(selected("{ probe { edges } }").await, json!(["edges"]));
    }

    // Test critique: les fragments sont développés
    #[tokio::test]
    async fn test_fragments_are_expanded() {
        let query = r#"
            { probe { edges ...Info ... on Probe { count } } }
            fragment Info on Probe { pageInfo }
        "#;
        assert_eq!(
            selected(query).await,
            json!(["count", "edges", "pageInfo"])
        );
    }
}
