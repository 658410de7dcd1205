//! Metrics collection for orchestrator monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Orchestrator metrics.
pub struct EngineMetrics {
    /// Total batches started.
    pub batches_total: AtomicU64,
    /// Total pairs requested across batches.
    pub pairs_requested: AtomicU64,
    /// Pairs that produced a bid/ask.
    pub pairs_resolved: AtomicU64,
    /// Pairs that produced errors only.
    pub pairs_failed: AtomicU64,
    /// Fallback attempts after a failed primary evaluation.
    pub fallbacks_attempted: AtomicU64,
    /// Fallback attempts that produced a bid/ask.
    pub fallbacks_resolved: AtomicU64,
    /// Exchange queries started (after per-batch dedup).
    pub exchange_queries: AtomicU64,
    /// Exchange queries that came back with a failure diagnostic.
    pub exchange_failures: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            batches_total: AtomicU64::new(0),
            pairs_requested: AtomicU64::new(0),
            pairs_resolved: AtomicU64::new(0),
            pairs_failed: AtomicU64::new(0),
            fallbacks_attempted: AtomicU64::new(0),
            fallbacks_resolved: AtomicU64::new(0),
            exchange_queries: AtomicU64::new(0),
            exchange_failures: AtomicU64::new(0),
        }
    }

    /// Record a batch starting.
    pub fn batch_started(&self) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pair entering a batch.
    pub fn pair_requested(&self) {
        self.pairs_requested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pair resolving to a price.
    pub fn pair_resolved(&self) {
        self.pairs_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pair finishing without a price.
    pub fn pair_failed(&self) {
        self.pairs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fallback attempt.
    pub fn fallback_attempted(&self) {
        self.fallbacks_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fallback attempt that resolved.
    pub fn fallback_resolved(&self) {
        self.fallbacks_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an exchange query being started.
    pub fn exchange_query_started(&self) {
        self.exchange_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an exchange query failure diagnostic.
    pub fn exchange_query_failed(&self) {
        self.exchange_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            batches_total: self.batches_total.load(Ordering::Relaxed),
            pairs_requested: self.pairs_requested.load(Ordering::Relaxed),
            pairs_resolved: self.pairs_resolved.load(Ordering::Relaxed),
            pairs_failed: self.pairs_failed.load(Ordering::Relaxed),
            fallbacks_attempted: self.fallbacks_attempted.load(Ordering::Relaxed),
            fallbacks_resolved: self.fallbacks_resolved.load(Ordering::Relaxed),
            exchange_queries: self.exchange_queries.load(Ordering::Relaxed),
            exchange_failures: self.exchange_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP ratemesh_batches_total Total rate batches started
# TYPE ratemesh_batches_total counter
ratemesh_batches_total {}

# HELP ratemesh_pairs_requested Total pairs requested
# TYPE ratemesh_pairs_requested counter
ratemesh_pairs_requested {}

# HELP ratemesh_pairs_resolved Total pairs resolved to a price
# TYPE ratemesh_pairs_resolved counter
ratemesh_pairs_resolved {}

# HELP ratemesh_pairs_failed Total pairs finished without a price
# TYPE ratemesh_pairs_failed counter
ratemesh_pairs_failed {}

# HELP ratemesh_fallbacks_attempted Total fallback attempts
# TYPE ratemesh_fallbacks_attempted counter
ratemesh_fallbacks_attempted {}

# HELP ratemesh_fallbacks_resolved Total fallback attempts that resolved
# TYPE ratemesh_fallbacks_resolved counter
ratemesh_fallbacks_resolved {}

# HELP ratemesh_exchange_queries Total exchange queries started
# TYPE ratemesh_exchange_queries counter
ratemesh_exchange_queries {}

# HELP ratemesh_exchange_failures Total exchange query failures
# TYPE ratemesh_exchange_failures counter
ratemesh_exchange_failures {}
"#,
            snapshot.batches_total,
            snapshot.pairs_requested,
            snapshot.pairs_resolved,
            snapshot.pairs_failed,
            snapshot.fallbacks_attempted,
            snapshot.fallbacks_resolved,
            snapshot.exchange_queries,
            snapshot.exchange_failures,
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct EngineMetricsSnapshot {
    pub batches_total: u64,
    pub pairs_requested: u64,
    pub pairs_resolved: u64,
    pub pairs_failed: u64,
    pub fallbacks_attempted: u64,
    pub fallbacks_resolved: u64,
    pub exchange_queries: u64,
    pub exchange_failures: u64,
}

/// Shared metrics instance.
pub type SharedEngineMetrics = Arc<EngineMetrics>;
