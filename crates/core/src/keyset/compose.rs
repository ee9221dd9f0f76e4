//! Batch composition.
//!
//! Turns the requests of one batch into at most two statements: every
//! request needing edges contributes an edges sub-query, every request
//! needing a count contributes a count sub-query. Sub-queries are tagged
//! with the request's position so results can be routed back.

use tracing::debug;

use crate::error::LoaderResult;
use crate::keyset::predicate::build_keyset;
use crate::keyset::request::PaginationRequest;
use crate::keyset::selection::{RequestedFields, SubQueryNeeds};
use crate::ports::Cursor;
use crate::query::{BatchKey, Expr, Source, Statement, StatementKind, SubQuery};

/// What the demultiplexer needs to know about one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedRequest {
    pub key: BatchKey,
    pub needs: SubQueryNeeds,
    pub limit: Option<u64>,
    pub reverse: bool,
    pub has_cursor: bool,
}

/// Statements for one batch plus the per-request plan.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub edges: Statement,
    pub counts: Statement,
    /// One entry per request, in request order. Requests that could not be
    /// planned carry their error and contribute no sub-queries.
    pub requests: Vec<LoaderResult<PlannedRequest>>,
}

/// Compose the statements for a batch of requests over `source`.
pub fn compose_batch(
    source: &Source,
    requests: &[PaginationRequest],
    defaults: &RequestedFields,
) -> BatchPlan {
    let mut edges = Statement::new(StatementKind::Edges, source.clone());
    let mut counts = Statement::new(StatementKind::Count, source.clone());

    let planned = requests
        .iter()
        .enumerate()
        .map(|(index, request)| -> LoaderResult<PlannedRequest> {
            let key = BatchKey(index);
            let needs = request.needs(defaults);
            let filter = request.filter.clone().unwrap_or(Expr::True);

            if needs.edges {
                let cursor = request.active_cursor().map(Cursor::decode).transpose()?;
                let keyset = build_keyset(&request.order_by, request.reverse, cursor.as_deref())?;
                let predicate = Expr::all(std::iter::once(filter.clone()).chain(keyset.seek));

                // One extra row tells whether another page exists.
                edges.push(
                    SubQuery::new(key, predicate)
                        .order_by(keyset.order_by)
                        .limit(request.limit.map(|limit| limit.saturating_add(1))),
                );
            }

            if needs.count {
                counts.push(SubQuery::new(key, filter));
            }

            Ok(PlannedRequest {
                key,
                needs,
                limit: request.limit,
                reverse: request.reverse,
                has_cursor: request.active_cursor().is_some(),
            })
        })
        .collect();

    debug!(
        requests = requests.len(),
        edges_parts = edges.len(),
        count_parts = counts.len(),
        "Composed batch"
    );

    BatchPlan {
        edges,
        counts,
        requests: planned,
    }
}
