//! Concurrency control for the corvid column store.
//!
//! Two interchangeable conflict-resolution strategies present the same
//! transactional surface over `(table, offset)` cells:
//!
//! - [`ss2pl`]: strict two-phase locking at row granularity with a
//!   shared/exclusive lock table and wait-die deadlock avoidance.
//! - [`sgt`]: serialization-graph testing — no locks held to commit;
//!   read/write dependencies among live transactions are tracked and a
//!   transaction whose operation would close a cycle aborts. Every
//!   serializable schedule is admitted; no unserializable one commits.
//!
//! A coordinator is owned by exactly one worker thread; the strategy objects
//! ([`ss2pl::LockManager`], [`sgt::SerializationGraph`]) and the
//! [`epoch::EpochRegistry`] are shared across threads.

pub mod config;
pub mod epoch;
pub mod metrics;
pub mod session;
pub mod sgt;
pub mod ss2pl;
pub mod undo;

use std::sync::Arc;

use corvid_error::TxnError;
use corvid_storage::{Table, Value};
use corvid_types::TxId;

pub use config::CcConfig;
pub use epoch::{EpochGuard, EpochMetricsSnapshot, EpochRegistry};
pub use metrics::{CcMetrics, CcMetricsSnapshot};
pub use sgt::{DependencyKind, SerializationGraph, SgtCoordinator};
pub use ss2pl::{LockManager, SsplCoordinator};

/// The transactional surface both strategies implement.
///
/// A client calls [`start`](Self::start) to obtain a transaction id, then any
/// sequence of [`read`](Self::read) / [`write`](Self::write) on cells, then
/// exactly one terminal call ([`commit`](Self::commit) or
/// [`abort`](Self::abort)). A failed operation has already rolled the
/// transaction back; later operations on the same id report
/// [`TxnError::DeadTransaction`].
pub trait ConcurrencyControl<V: Value> {
    /// Allocate a fresh transaction id and open its epoch guard. Never fails.
    fn start(&mut self) -> TxId;

    /// Load `table[offset]` under conflict control.
    fn read(&mut self, table: &Arc<Table<V>>, offset: usize, tx: TxId) -> Result<V, TxnError>;

    /// Replace `table[offset]` with `value` under conflict control.
    fn write(
        &mut self,
        table: &Arc<Table<V>>,
        offset: usize,
        value: V,
        tx: TxId,
    ) -> Result<(), TxnError>;

    /// Finalize the transaction. On failure the error carries the set of
    /// transactions the caller must also consider aborted.
    fn commit(&mut self, tx: TxId) -> Result<(), TxnError>;

    /// Unconditional rollback. Idempotent.
    fn abort(&mut self, tx: TxId);
}
