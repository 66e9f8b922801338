// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate facade; the embedding process picks the exporter.
//!
//! # Metric Naming Convention
//! - `task_failover_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: primary, secondary (or the adapter's configured name)
//! - `operation`: save, find_by_id, find_all, exists_by_id, delete_by_id
//! - `status`: success, error, not_found

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one store call made by the gateway
pub fn record_operation(store: &str, operation: &str, status: &str) {
    counter!(
        "task_failover_operations_total",
        "store" => store.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record latency of a gateway operation (both attempts included)
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "task_failover_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record that an operation was redirected to the secondary store
pub fn record_fallback(operation: &str, reason: &str) {
    counter!(
        "task_failover_fallbacks_total",
        "operation" => operation.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record that both stores failed an operation
pub fn record_both_failed(operation: &str) {
    counter!(
        "task_failover_both_failed_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a store call cut off by its time bound
pub fn record_store_timeout(store: &str, operation: &str) {
    counter!(
        "task_failover_store_timeouts_total",
        "store" => store.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Set store availability as last seen by a probe (1 = available)
pub fn set_store_available(store: &str, available: bool) {
    gauge!(
        "task_failover_store_available",
        "store" => store.to_string()
    )
    .set(if available { 1.0 } else { 0.0 });
}

/// Record how a reconciliation pass ended (completed, skipped_unavailable, ...)
pub fn record_reconcile_pass(outcome: &str) {
    counter!(
        "task_failover_reconcile_passes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record per-pass record counts
pub fn record_reconcile_counts(read: usize, migrated: usize, failed: usize, purged: u64) {
    counter!("task_failover_reconcile_read_total").increment(read as u64);
    counter!("task_failover_reconcile_migrated_total").increment(migrated as u64);
    counter!("task_failover_reconcile_failed_total").increment(failed as u64);
    counter!("task_failover_reconcile_purged_total").increment(purged);
}

/// Record reconciliation pass duration
pub fn record_reconcile_duration(duration: Duration) {
    histogram!("task_failover_reconcile_seconds").record(duration.as_secs_f64());
}

/// Set engine lifecycle state
pub fn set_engine_state(state: &str) {
    gauge!(
        "task_failover_engine_state",
        "state" => state.to_string()
    )
    .set(1.0);
}

/// RAII timer: records operation latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
