//! Sink metrics for observability
//!
//! In-process counters per sink; the Prometheus side lives in `observability`.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Records handed to the sink
    received_count: AtomicU64,
    /// Records accepted downstream
    sent_count: AtomicU64,
    /// Records given up on
    dropped_count: AtomicU64,
    /// Resubmissions after a partial or transport failure
    retry_count: AtomicU64,
    /// Failed downstream calls
    failure_count: AtomicU64,
    /// Operations that outlived their timeout
    timeout_count: AtomicU64,
    /// Batches accepted but not yet resolved
    in_flight: AtomicI64,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received_count(&self) -> u64 {
        self.received_count.load(Ordering::Relaxed)
    }

    pub fn add_received(&self, n: usize) {
        self.received_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    pub fn add_sent(&self, n: usize) {
        self.sent_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn add_dropped(&self, n: usize) {
        self.dropped_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn inc_retry_count(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Relaxed)
    }

    pub fn inc_timeout_count(&self) {
        self.timeout_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn batch_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received_count: self.received_count(),
            sent_count: self.sent_count(),
            dropped_count: self.dropped_count(),
            retry_count: self.retry_count(),
            failure_count: self.failure_count(),
            timeout_count: self.timeout_count(),
            in_flight: self.in_flight(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received_count: u64,
    pub sent_count: u64,
    pub dropped_count: u64,
    pub retry_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub in_flight: i64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recv={} sent={} dropped={} retries={} failures={} timeouts={}",
            self.received_count,
            self.sent_count,
            self.dropped_count,
            self.retry_count,
            self.failure_count,
            self.timeout_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = SinkMetrics::new();
        metrics.add_received(10);
        metrics.add_sent(7);
        metrics.add_dropped(3);
        metrics.inc_retry_count();
        metrics.batch_started();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received_count, 10);
        assert_eq!(snapshot.sent_count, 7);
        assert_eq!(snapshot.dropped_count, 3);
        assert_eq!(snapshot.retry_count, 1);
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(
            snapshot.to_string(),
            "recv=10 sent=7 dropped=3 retries=1 failures=0 timeouts=0"
        );
    }
}
