//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_sync_items_applied_total` - Sync items applied (including replays)
//! - `ledger_sync_items_failed_total` - Sync items reported as failed
//! - `ledger_sync_deletes_ignored_total` - Sync deletes that matched nothing
//! - `ledger_version_conflicts_total` - Direct edits rejected on version
//! - `ledger_balance_duration_seconds` - Histogram of balance computations

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Sync items applied
    pub sync_items_applied: IntCounter,

    /// Sync items failed
    pub sync_items_failed: IntCounter,

    /// Sync deletes that matched nothing
    pub sync_deletes_ignored: IntCounter,

    /// Version conflicts on direct edits
    pub version_conflicts: IntCounter,

    /// Balance computation duration histogram
    pub balance_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("sync_items_applied", &self.sync_items_applied.get())
            .field("sync_items_failed", &self.sync_items_failed.get())
            .field("version_conflicts", &self.version_conflicts.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector with a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let sync_items_applied = IntCounter::new(
            "ledger_sync_items_applied_total",
            "Sync items applied (including idempotent replays)",
        )?;
        registry.register(Box::new(sync_items_applied.clone()))?;

        let sync_items_failed = IntCounter::new(
            "ledger_sync_items_failed_total",
            "Sync items reported back as failed",
        )?;
        registry.register(Box::new(sync_items_failed.clone()))?;

        let sync_deletes_ignored = IntCounter::new(
            "ledger_sync_deletes_ignored_total",
            "Sync deletes whose filter matched nothing",
        )?;
        registry.register(Box::new(sync_deletes_ignored.clone()))?;

        let version_conflicts = IntCounter::new(
            "ledger_version_conflicts_total",
            "Direct edits rejected because of a stale version",
        )?;
        registry.register(Box::new(version_conflicts.clone()))?;

        let balance_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_balance_duration_seconds",
                "Histogram of balance computation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(balance_duration.clone()))?;

        Ok(Self {
            sync_items_applied,
            sync_items_failed,
            sync_deletes_ignored,
            version_conflicts,
            balance_duration,
            registry,
        })
    }

    /// Record the outcome of a sync batch
    pub fn record_sync_batch(&self, applied: usize, failed: usize, ignored: usize) {
        self.sync_items_applied.inc_by(applied as u64);
        self.sync_items_failed.inc_by(failed as u64);
        self.sync_deletes_ignored.inc_by(ignored as u64);
    }

    /// Record a version conflict
    pub fn record_conflict(&self) {
        self.version_conflicts.inc();
    }

    /// Record balance computation duration
    pub fn record_balance_duration(&self, duration_seconds: f64) {
        self.balance_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.sync_items_applied.get(), 0);
        assert_eq!(metrics.version_conflicts.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Private registries, so two ledgers in one process do not collide
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_conflict();
        assert_eq!(first.version_conflicts.get(), 1);
        assert_eq!(second.version_conflicts.get(), 0);
    }

    #[test]
    fn test_record_sync_batch() {
        let metrics = Metrics::new().unwrap();
        metrics.record_sync_batch(3, 1, 1);
        metrics.record_sync_batch(2, 0, 0);
        assert_eq!(metrics.sync_items_applied.get(), 5);
        assert_eq!(metrics.sync_items_failed.get(), 1);
        assert_eq!(metrics.sync_deletes_ignored.get(), 1);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_balance_duration(0.002);
        let text = metrics.render().unwrap();
        assert!(text.contains("ledger_balance_duration_seconds"));
        assert!(text.contains("ledger_sync_items_applied_total 0"));
    }
}
