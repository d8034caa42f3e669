//! Synchronization metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the application.
//! - Bulk items sent, by operation and outcome
//! - Document build failures
//! - Suspension flushes
//! - Bulk request duration

use std::time::Duration;

use crate::engine::BulkOperation;

/// Record one bulk item outcome
pub fn record_bulk_item(connection: &str, doc_type: &str, op: BulkOperation, ok: bool) {
    metrics::counter!(
        "modelsync_bulk_items_total",
        "connection" => connection.to_string(),
        "doc_type" => doc_type.to_string(),
        "op" => op.as_str(),
        "status" => if ok { "ok" } else { "error" },
    )
    .increment(1);
}

/// Record a bulk request that failed as a whole
pub fn record_bulk_group_failure(connection: &str, doc_type: &str, items: usize) {
    metrics::counter!(
        "modelsync_bulk_items_total",
        "connection" => connection.to_string(),
        "doc_type" => doc_type.to_string(),
        "op" => "any",
        "status" => "error",
    )
    .increment(items as u64);
}

pub fn record_bulk_duration(connection: &str, doc_type: &str, duration: Duration) {
    metrics::histogram!(
        "modelsync_bulk_duration_seconds",
        "connection" => connection.to_string(),
        "doc_type" => doc_type.to_string(),
    )
    .record(duration.as_secs_f64());
}

pub fn record_build_failure(doc_type: &str) {
    metrics::counter!(
        "modelsync_document_build_failures_total",
        "doc_type" => doc_type.to_string(),
    )
    .increment(1);
}

/// Record a suspension flush and how many changes it carried
pub fn record_flush(changes: usize) {
    metrics::counter!("modelsync_flush_total").increment(1);
    metrics::histogram!("modelsync_flush_changes").record(changes as f64);
}
