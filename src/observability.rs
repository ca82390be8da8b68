use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{info, warn};

/// Workflow engine counters
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub committed: AtomicU64,
    pub conflicts_retried: AtomicU64,
    pub conflicts_exhausted: AtomicU64,
    pub rejected: AtomicU64,
    pub notification_failures: AtomicU64,
    pub area_cache_hits: AtomicU64,
    pub area_cache_misses: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_retry(&self) {
        self.conflicts_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_exhausted(&self) {
        self.conflicts_exhausted.fetch_add(1, Ordering::Relaxed);
        warn!("Transaction retries exhausted");
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_area_cache_hit(&self) {
        self.area_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_area_cache_miss(&self) {
        self.area_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            committed: self.committed.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            conflicts_exhausted: self.conflicts_exhausted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            area_cache_hits: self.area_cache_hits.load(Ordering::Relaxed),
            area_cache_misses: self.area_cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            committed = stats.committed,
            conflicts_retried = stats.conflicts_retried,
            conflicts_exhausted = stats.conflicts_exhausted,
            rejected = stats.rejected,
            notification_failures = stats.notification_failures,
            area_cache_hits = stats.area_cache_hits,
            area_cache_misses = stats.area_cache_misses,
            "Workflow metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    pub committed: u64,
    pub conflicts_retried: u64,
    pub conflicts_exhausted: u64,
    pub rejected: u64,
    pub notification_failures: u64,
    pub area_cache_hits: u64,
    pub area_cache_misses: u64,
}

/// Global metrics instance
static WORKFLOW_METRICS: LazyLock<Arc<WorkflowMetrics>> =
    LazyLock::new(|| Arc::new(WorkflowMetrics::new()));

pub fn workflow_metrics() -> Arc<WorkflowMetrics> {
    WORKFLOW_METRICS.clone()
}

/// Span wrapping one workflow operation
pub fn create_workflow_span(operation: &str, target: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow.operation = operation,
        workflow.target = target,
        correlation.id = correlation_id,
        attempts = tracing::field::Empty,
    )
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
