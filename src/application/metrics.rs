//! Observability metrics for reconciliation.
//!
//! Counts mutations, retries and terminal retry outcomes so operators can see
//! how contended a token scope is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking reconciliation statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters, so one instance can be handed to several
/// reconcilers and read from a health check.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Mutation requests that the remote accepted
    mutations_submitted: AtomicU64,
    /// Insert and delete operations carried by accepted update requests
    operations_submitted: AtomicU64,
    /// Attempts retried after a stale token or concurrent modification
    conflicts_retried: AtomicU64,
    /// Attempts retried after throttling
    throttles_retried: AtomicU64,
    /// Retry loops that ran out of time
    retry_timeouts: AtomicU64,
    /// Updates skipped because the diff was empty
    noop_updates: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                mutations_submitted: AtomicU64::new(0),
                operations_submitted: AtomicU64::new(0),
                conflicts_retried: AtomicU64::new(0),
                throttles_retried: AtomicU64::new(0),
                retry_timeouts: AtomicU64::new(0),
                noop_updates: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn record_mutation(&self) {
        self.inner
            .mutations_submitted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_operations(&self, count: usize) {
        self.inner
            .operations_submitted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.inner.conflicts_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttle(&self) {
        self.inner.throttles_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.inner.retry_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_noop(&self) {
        self.inner.noop_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of accepted mutation requests.
    pub fn mutations_submitted(&self) -> u64 {
        self.inner.mutations_submitted.load(Ordering::Relaxed)
    }

    /// Get the number of member operations carried by accepted updates.
    pub fn operations_submitted(&self) -> u64 {
        self.inner.operations_submitted.load(Ordering::Relaxed)
    }

    /// Get the number of conflict retries.
    pub fn conflicts_retried(&self) -> u64 {
        self.inner.conflicts_retried.load(Ordering::Relaxed)
    }

    /// Get the number of throttle retries.
    pub fn throttles_retried(&self) -> u64 {
        self.inner.throttles_retried.load(Ordering::Relaxed)
    }

    /// Get the number of retry loops that timed out.
    pub fn retry_timeouts(&self) -> u64 {
        self.inner.retry_timeouts.load(Ordering::Relaxed)
    }

    /// Get the number of updates skipped as no-ops.
    pub fn noop_updates(&self) -> u64 {
        self.inner.noop_updates.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            mutations_submitted: self.mutations_submitted(),
            operations_submitted: self.operations_submitted(),
            conflicts_retried: self.conflicts_retried(),
            throttles_retried: self.throttles_retried(),
            retry_timeouts: self.retry_timeouts(),
            noop_updates: self.noop_updates(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.mutations_submitted.store(0, Ordering::Relaxed);
        self.inner.operations_submitted.store(0, Ordering::Relaxed);
        self.inner.conflicts_retried.store(0, Ordering::Relaxed);
        self.inner.throttles_retried.store(0, Ordering::Relaxed);
        self.inner.retry_timeouts.store(0, Ordering::Relaxed);
        self.inner.noop_updates.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub mutations_submitted: u64,
    pub operations_submitted: u64,
    pub conflicts_retried: u64,
    pub throttles_retried: u64,
    pub retry_timeouts: u64,
    pub noop_updates: u64,
}

impl MetricsSnapshot {
    /// Ratio of conflict retries to all mutation attempts (0.0 to 1.0).
    ///
    /// Returns 0.0 if nothing was attempted.
    pub fn conflict_rate(&self) -> f64 {
        let attempts = self
            .mutations_submitted
            .saturating_add(self.conflicts_retried);
        if attempts == 0 {
            0.0
        } else {
            self.conflicts_retried as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot() {
        let metrics = Metrics::new();
        metrics.record_mutation();
        metrics.record_operations(3);
        metrics.record_conflict();
        metrics.record_throttle();
        metrics.record_throttle();
        metrics.record_noop();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.mutations_submitted, 1);
        assert_eq!(snapshot.operations_submitted, 3);
        assert_eq!(snapshot.conflicts_retried, 1);
        assert_eq!(snapshot.throttles_retried, 2);
        assert_eq!(snapshot.retry_timeouts, 0);
        assert_eq!(snapshot.noop_updates, 1);
    }

    #[test]
    fn test_conflict_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().conflict_rate(), 0.0);

        metrics.record_mutation();
        assert_eq!(metrics.snapshot().conflict_rate(), 0.0);

        metrics.record_conflict();
        assert!((metrics.snapshot().conflict_rate() - 0.5).abs() < f64::EPSILON);

        metrics.record_conflict();
        metrics.record_conflict();
        assert!((metrics.snapshot().conflict_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_mutation();
        metrics.record_timeout();

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let metrics1 = Metrics::new();
        metrics1.record_conflict();

        let metrics2 = metrics1.clone();
        metrics2.record_conflict();

        assert_eq!(metrics1.conflicts_retried(), 2);
        assert_eq!(metrics2.conflicts_retried(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.record_mutation();
                    m.record_throttle();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.mutations_submitted(), 1000);
        assert_eq!(metrics.throttles_retried(), 1000);
    }
}
