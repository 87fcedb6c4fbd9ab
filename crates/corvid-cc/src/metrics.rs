//! Per-strategy operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters a strategy object keeps across all coordinators that share it.
///
/// Lock-free `AtomicU64` with `Relaxed` ordering: readers may observe stale
/// counts but never torn values.
#[derive(Debug, Default)]
pub struct CcMetrics {
    starts_total: AtomicU64,
    commits_total: AtomicU64,
    aborts_total: AtomicU64,
    cascade_marks_total: AtomicU64,
    conflict_denials_total: AtomicU64,
    wait_retries_total: AtomicU64,
}

impl CcMetrics {
    pub(crate) fn record_start(&self) {
        self.starts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cascade_marks(&self, count: u64) {
        self.cascade_marks_total.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict_denial(&self) {
        self.conflict_denials_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait_retry(&self) {
        self.wait_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CcMetricsSnapshot {
        CcMetricsSnapshot {
            starts_total: self.starts_total.load(Ordering::Relaxed),
            commits_total: self.commits_total.load(Ordering::Relaxed),
            aborts_total: self.aborts_total.load(Ordering::Relaxed),
            cascade_marks_total: self.cascade_marks_total.load(Ordering::Relaxed),
            conflict_denials_total: self.conflict_denials_total.load(Ordering::Relaxed),
            wait_retries_total: self.wait_retries_total.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`CcMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CcMetricsSnapshot {
    pub starts_total: u64,
    pub commits_total: u64,
    pub aborts_total: u64,
    pub cascade_marks_total: u64,
    pub conflict_denials_total: u64,
    pub wait_retries_total: u64,
}

impl std::fmt::Display for CcMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cc(started={} committed={} aborted={} cascaded={} denied={} retried={})",
            self.starts_total,
            self.commits_total,
            self.aborts_total,
            self.cascade_marks_total,
            self.conflict_denials_total,
            self.wait_retries_total,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::CcMetrics;

    #[test]
    fn counters_accumulate_into_the_snapshot() {
        let m = CcMetrics::default();
        m.record_start();
        m.record_start();
        m.record_commit();
        m.record_abort();
        m.record_cascade_marks(3);
        m.record_conflict_denial();
        m.record_wait_retry();

        let snap = m.snapshot();
        assert_eq!(snap.starts_total, 2);
        assert_eq!(snap.commits_total, 1);
        assert_eq!(snap.aborts_total, 1);
        assert_eq!(snap.cascade_marks_total, 3);
        assert_eq!(snap.conflict_denials_total, 1);
        assert_eq!(snap.wait_retries_total, 1);
        assert!(snap.to_string().contains("cascaded=3"));
    }

    #[test]
    fn snapshot_serializes() {
        let m = CcMetrics::default();
        m.record_commit();
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("\"commits_total\":1"));
    }
}
