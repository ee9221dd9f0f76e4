//! Metrics definitions for the loaders.
//!
//! This module defines all metrics recorded by the batching and statement
//! execution paths. Metrics are collected using the `metrics` crate and can
//! be exported to Prometheus via `metrics-exporter-prometheus`. Without an
//! installed recorder every call here is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

use crate::query::StatementKind;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "folio_batches_dispatched_total",
        "Total number of batches handed to a batch function"
    );
    describe_histogram!(
        "folio_batch_size",
        "Number of keys per dispatched batch"
    );
    describe_counter!(
        "folio_statements_executed_total",
        "Total number of statements sent to the executor, by kind"
    );
    describe_counter!(
        "folio_statements_skipped_total",
        "Total number of statements skipped because no request needed them"
    );
    describe_counter!(
        "folio_statement_errors_total",
        "Total number of failed statements, by kind"
    );
    describe_histogram!(
        "folio_statement_duration_seconds",
        "Time taken to execute a statement in seconds"
    );
    describe_counter!(
        "folio_cache_hits_total",
        "Total number of loads answered from the memoization cache"
    );
}

/// Record a dispatched batch and its size.
pub fn record_batch_dispatched(size: usize) {
    counter!("folio_batches_dispatched_total").increment(1);
    histogram!("folio_batch_size").record(size as f64);
}

/// Record a statement sent to the executor.
pub fn record_statement_executed(kind: StatementKind) {
    counter!("folio_statements_executed_total", "kind" => kind.as_str()).increment(1);
}

/// Record a statement that had no sub-queries and was not sent.
pub fn record_statement_skipped(kind: StatementKind) {
    counter!("folio_statements_skipped_total", "kind" => kind.as_str()).increment(1);
}

/// Record a failed statement.
pub fn record_statement_error(kind: StatementKind) {
    counter!("folio_statement_errors_total", "kind" => kind.as_str()).increment(1);
}

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!("folio_cache_hits_total").increment(1);
}

/// A timer that records a statement's duration when dropped.
pub struct StatementTimer {
    kind: StatementKind,
    start: Instant,
}

impl StatementTimer {
    /// Start timing a statement of `kind`.
    pub fn start(kind: StatementKind) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for StatementTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!("folio_statement_duration_seconds", "kind" => self.kind.as_str())
            .record(duration);
    }
}
