//! Result demultiplexing.
//!
//! Routes the rows of a batch's statements back to the requests that
//! produced them and shapes each group into a [`Connection`].

use std::collections::HashMap;

use crate::error::LoaderResult;
use crate::keyset::compose::PlannedRequest;
use crate::ports::{Connection, CountRow, Cursor, Edge, EdgeRow, PageInfo};
use crate::query::BatchKey;

/// Shape one request's rows into a page.
///
/// `rows` are in fetch order and may hold one look-ahead row past `limit`.
pub fn paginate<T>(
    rows: Vec<EdgeRow<T>>,
    limit: Option<u64>,
    reverse: bool,
    has_cursor: bool,
    count: i64,
) -> Connection<T> {
    let fetched = rows.len();
    let keep = limit.map_or(fetched, |limit| {
        usize::try_from(limit).map_or(fetched, |limit| limit.min(fetched))
    });

    let mut edges: Vec<Edge<T>> = rows
        .into_iter()
        .take(keep)
        .map(|row| Edge {
            cursor: Cursor::encode(&row.sort_key),
            node: row.node,
        })
        .collect();
    if reverse {
        edges.reverse();
    }

    let has_more = fetched > edges.len();
    let page_info = PageInfo {
        has_next_page: if reverse { has_cursor } else { has_more },
        has_previous_page: if reverse { has_more } else { has_cursor },
        start_cursor: edges.first().map(|edge| edge.cursor.clone()),
        end_cursor: edges.last().map(|edge| edge.cursor.clone()),
    };

    Connection {
        edges,
        page_info,
        count,
    }
}

/// Build one result per planned request from the statements' outcomes.
///
/// A failed statement fails exactly the requests that needed it.
pub fn demultiplex<T>(
    requests: Vec<LoaderResult<PlannedRequest>>,
    edges: LoaderResult<Vec<EdgeRow<T>>>,
    counts: LoaderResult<Vec<CountRow>>,
) -> Vec<LoaderResult<Connection<T>>> {
    let (mut edge_groups, edges_error) = match edges {
        Ok(rows) => (group_by_key(rows), None),
        Err(e) => (HashMap::new(), Some(e)),
    };
    let (count_by_key, counts_error) = match counts {
        Ok(rows) => (
            rows.into_iter()
                .map(|row| (row.key, row.count))
                .collect::<HashMap<_, _>>(),
            None,
        ),
        Err(e) => (HashMap::new(), Some(e)),
    };

    requests
        .into_iter()
        .map(|planned| -> LoaderResult<Connection<T>> {
            let planned = planned?;

            let rows = match (planned.needs.edges, &edges_error) {
                (false, _) => Vec::new(),
                (true, Some(e)) => return Err(e.clone()),
                (true, None) => edge_groups.remove(&planned.key).unwrap_or_default(),
            };
            let count = match (planned.needs.count, &counts_error) {
                (false, _) => 0,
                (true, Some(e)) => return Err(e.clone()),
                (true, None) => count_by_key.get(&planned.key).copied().unwrap_or(0),
            };

            Ok(paginate(
                rows,
                planned.limit,
                planned.reverse,
                planned.has_cursor,
                count,
            ))
        })
        .collect()
}

fn group_by_key<T>(rows: Vec<EdgeRow<T>>) -> HashMap<BatchKey, Vec<EdgeRow<T>>> {
    let mut groups: HashMap<BatchKey, Vec<EdgeRow<T>>> = HashMap::new();
    for row in rows {
        groups.entry(row.key).or_default().push(row);
    }
    groups
}
