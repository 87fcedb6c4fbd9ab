//! Epoch-based reclamation for transaction bookkeeping.
//!
//! Every undo record and serialization-graph node freed at a terminal call
//! must remain addressable until no live transaction can still reference it.
//! A transaction pins the epoch domain at `start` via an [`EpochGuard`] and
//! unpins at commit/abort; retirements deferred through the guard execute
//! only after all guards pinned in the same epoch have dropped.
//!
//! Built on `crossbeam-epoch` pin/unpin; the [`EpochRegistry`] adds pin
//! accounting and stale-pin diagnostics so a transaction that forgets its
//! terminal call shows up in the logs instead of silently blocking
//! reclamation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_epoch::{self as epoch, Guard};
use parking_lot::Mutex;
use serde::Serialize;

/// Pin/retire counters for one registry.
#[derive(Debug, Default)]
pub struct EpochMetrics {
    pins_total: AtomicU64,
    unpins_total: AtomicU64,
    retirements_total: AtomicU64,
    active_high_water: AtomicU64,
}

impl EpochMetrics {
    fn record_pin(&self, active_now: u64) {
        self.pins_total.fetch_add(1, Ordering::Relaxed);
        self.active_high_water
            .fetch_max(active_now, Ordering::Relaxed);
    }

    fn record_unpin(&self) {
        self.unpins_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retirement(&self) {
        self.retirements_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> EpochMetricsSnapshot {
        EpochMetricsSnapshot {
            pins_total: self.pins_total.load(Ordering::Relaxed),
            unpins_total: self.unpins_total.load(Ordering::Relaxed),
            retirements_total: self.retirements_total.load(Ordering::Relaxed),
            active_high_water: self.active_high_water.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`EpochMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EpochMetricsSnapshot {
    pub pins_total: u64,
    pub unpins_total: u64,
    pub retirements_total: u64,
    pub active_high_water: u64,
}

impl std::fmt::Display for EpochMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "epoch(pinned={} unpinned={} retired={} hw={})",
            self.pins_total, self.unpins_total, self.retirements_total, self.active_high_water,
        )
    }
}

/// Registry of active transaction pins.
///
/// Lock-based and simple: cardinality is bounded by live transactions.
#[derive(Debug)]
pub struct EpochRegistry {
    warn_after: Duration,
    next_pin_id: AtomicU64,
    active: Mutex<HashMap<u64, Instant>>,
    metrics: EpochMetrics,
}

impl EpochRegistry {
    /// Registry warning about pins older than `warn_after`.
    #[must_use]
    pub fn new(warn_after: Duration) -> Self {
        Self {
            warn_after,
            next_pin_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            metrics: EpochMetrics::default(),
        }
    }

    /// Number of currently pinned guards.
    #[must_use]
    pub fn active_pin_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Registry metrics.
    #[must_use]
    pub fn metrics(&self) -> &EpochMetrics {
        &self.metrics
    }

    /// Emit a warning for every pin older than the threshold, returning how
    /// many were flagged.
    pub fn warn_on_stale_pins(&self, now: Instant) -> usize {
        let mut warned = 0;
        for (&pin_id, &pinned_at) in self.active.lock().iter() {
            let pinned_for = now.saturating_duration_since(pinned_at);
            if pinned_for >= self.warn_after {
                tracing::warn!(
                    target: "corvid_cc::epoch",
                    pin_id,
                    pinned_for_ms = pinned_for.as_millis() as u64,
                    "stale transaction pin is blocking epoch advancement"
                );
                warned += 1;
            }
        }
        warned
    }

    fn register(&self, pinned_at: Instant) -> u64 {
        let pin_id = self.next_pin_id.fetch_add(1, Ordering::Relaxed);
        let mut active = self.active.lock();
        active.insert(pin_id, pinned_at);
        self.metrics.record_pin(active.len() as u64);
        pin_id
    }

    fn unregister(&self, pin_id: u64) {
        self.active.lock().remove(&pin_id);
        self.metrics.record_unpin();
    }
}

impl Default for EpochRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Transaction-scoped epoch pin.
///
/// Created at `start`, dropped at the terminal call. Holding the inner
/// `crossbeam_epoch::Guard` also makes the owning session `!Send`, which
/// matches the model: a transaction id is touched by exactly one thread for
/// its entire lifetime.
pub struct EpochGuard {
    registry: Arc<EpochRegistry>,
    pin_id: u64,
    pinned_at: Instant,
    guard: Guard,
}

impl EpochGuard {
    /// Pin the current thread into the epoch domain.
    #[must_use]
    pub fn enter(registry: Arc<EpochRegistry>) -> Self {
        let pinned_at = Instant::now();
        let pin_id = registry.register(pinned_at);
        let guard = epoch::pin();
        tracing::trace!(target: "corvid_cc::epoch", pin_id, "epoch pinned");
        Self {
            registry,
            pin_id,
            pinned_at,
            guard,
        }
    }

    /// Defer dropping `retired` until no contemporaneous pin can observe it.
    pub fn defer_retire<T: Send + 'static>(&self, retired: T) {
        self.registry.metrics.record_retirement();
        self.guard.defer(move || drop(retired));
    }

    /// Push the local deferred-retirement queue toward execution.
    pub fn flush(&self) {
        self.guard.flush();
    }
}

impl Drop for EpochGuard {
    fn drop(&mut self) {
        let pinned_for = self.pinned_at.elapsed();
        self.registry.unregister(self.pin_id);
        tracing::trace!(
            target: "corvid_cc::epoch",
            pin_id = self.pin_id,
            pinned_for_us = pinned_for.as_micros() as u64,
            "epoch unpinned"
        );
    }
}

impl std::fmt::Debug for EpochGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochGuard")
            .field("pin_id", &self.pin_id)
            .finish()
    }
}
