//! The SS2PL transaction coordinator.
//!
//! Each operation takes its per-cell serialization ticket, then asks the
//! shared [`LockManager`] for permission. A `Wait` decision releases the
//! ticket before spinning so a lock wait never stalls the cell's access
//! stream, then re-enters from the top; a `Die` decision rolls the
//! transaction back on the spot. Locks are strict: released only from
//! commit or abort.

use std::sync::Arc;

use corvid_error::TxnError;
use corvid_storage::{Table, Value};
use corvid_types::{AccessEntry, AccessMode, Ticket, TxId};

use crate::config::CcConfig;
use crate::epoch::EpochRegistry;
use crate::metrics::CcMetrics;
use crate::session::Session;
use crate::ss2pl::lock_manager::{LockDecision, LockManager};
use crate::undo::UndoEntry;
use crate::ConcurrencyControl;

/// Per-thread SS2PL coordinator over a shared [`LockManager`].
pub struct SsplCoordinator<V: Value> {
    lock_manager: Arc<LockManager>,
    config: CcConfig,
    session: Session<V>,
}

impl<V: Value> SsplCoordinator<V> {
    /// Coordinator with default tunables.
    #[must_use]
    pub fn new(lock_manager: Arc<LockManager>, registry: Arc<EpochRegistry>) -> Self {
        Self::with_config(lock_manager, registry, CcConfig::default())
    }

    /// Coordinator with explicit tunables.
    #[must_use]
    pub fn with_config(
        lock_manager: Arc<LockManager>,
        registry: Arc<EpochRegistry>,
        config: CcConfig,
    ) -> Self {
        Self {
            lock_manager,
            config,
            session: Session::new(registry),
        }
    }

    /// The shared strategy object.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Strategy metrics.
    #[must_use]
    pub fn metrics(&self) -> &CcMetrics {
        self.lock_manager.metrics()
    }

    /// Take the cell ticket and the row lock for one operation.
    fn admit(
        &mut self,
        table: &Arc<Table<V>>,
        offset: usize,
        tx: TxId,
        mode: AccessMode,
    ) -> Result<Ticket, TxnError> {
        let entry = AccessEntry::encode(tx, mode);
        let cell = table.cell(offset);
        loop {
            let prv = cell.acquire(entry, self.config.spin_yield_threshold);
            match self
                .lock_manager
                .try_lock(tx, mode.is_write(), table.id(), offset)
            {
                LockDecision::Granted => return Ok(prv),
                LockDecision::Wait => {
                    cell.abandon(prv);
                    self.lock_manager.metrics().record_wait_retry();
                    std::thread::yield_now();
                }
                LockDecision::Die => {
                    cell.abandon(prv);
                    self.lock_manager.metrics().record_conflict_denial();
                    self.rollback(tx);
                    return Err(TxnError::LockDenied { tx, offset });
                }
            }
        }
    }

    /// The unguarded replay path: swap the cell back without consulting the
    /// lock manager (the lock is still held) and record the replay so its
    /// access entry is unlinked at terminal cleanup.
    fn restore_write(&mut self, table: &Arc<Table<V>>, offset: usize, old: V, tx: TxId) {
        let cell = table.cell(offset);
        let prv = cell.acquire(
            AccessEntry::encode(tx, AccessMode::Write),
            self.config.spin_yield_threshold,
        );
        let displaced = table.column().replace(offset, old);
        cell.release(prv);
        self.session
            .undo()
            .push_write(Arc::clone(table), prv, offset, tx, displaced, old, true);
    }

    /// Roll `tx` back: invert its writes, then unlink, unlock and retire
    /// every record under the epoch guard.
    fn rollback(&mut self, tx: TxId) {
        self.session.mark_dead(tx);
        tracing::debug!(target: "corvid_cc::ss2pl", tx = %tx, op = "a", "rollback");

        for (table, offset, old) in self.session.undo().restore_work() {
            self.restore_write(&table, offset, old, tx);
        }

        let records: Vec<UndoEntry<V>> = self.session.undo().drain().collect();
        for record in records {
            record.unlink();
            if !record.is_replayed() {
                self.lock_manager
                    .unlock(tx, record.table().id(), record.offset());
            }
            if let Some(guard) = self.session.guard() {
                guard.defer_retire(record);
            }
        }

        self.session.finish();
        self.lock_manager.end(tx);
        self.lock_manager.metrics().record_abort();
    }
}

impl<V: Value> ConcurrencyControl<V> for SsplCoordinator<V> {
    fn start(&mut self) -> TxId {
        let tx = self.session.begin();
        self.lock_manager.start(tx);
        self.lock_manager.metrics().record_start();
        tracing::trace!(target: "corvid_cc::ss2pl", tx = %tx, "start");
        tx
    }

    fn read(&mut self, table: &Arc<Table<V>>, offset: usize, tx: TxId) -> Result<V, TxnError> {
        debug_assert!(tx.is_valid());
        debug_assert!(offset < table.len());

        if self.session.is_dead(tx) {
            return Err(TxnError::DeadTransaction { tx });
        }

        let prv = self.admit(table, offset, tx, AccessMode::Read)?;
        let value = table.column().load(offset);
        self.session
            .undo()
            .push_read(Arc::clone(table), prv, offset, tx);
        table.cell(offset).release(prv);
        tracing::trace!(
            target: "corvid_cc::ss2pl",
            tx = %tx,
            prv,
            table = %table.id(),
            offset,
            op = "r",
            "read"
        );
        Ok(value)
    }

    fn write(
        &mut self,
        table: &Arc<Table<V>>,
        offset: usize,
        value: V,
        tx: TxId,
    ) -> Result<(), TxnError> {
        debug_assert!(tx.is_valid());
        debug_assert!(offset < table.len());

        if self.session.is_dead(tx) {
            return Err(TxnError::DeadTransaction { tx });
        }

        let prv = self.admit(table, offset, tx, AccessMode::Write)?;
        let old = table.column().replace(offset, value);
        self.session
            .undo()
            .push_write(Arc::clone(table), prv, offset, tx, old, value, false);
        table.cell(offset).release(prv);
        tracing::trace!(
            target: "corvid_cc::ss2pl",
            tx = %tx,
            prv,
            table = %table.id(),
            offset,
            op = "w",
            "write"
        );
        Ok(())
    }

    fn commit(&mut self, tx: TxId) -> Result<(), TxnError> {
        debug_assert!(tx.is_valid());

        if self.session.clear_dead(tx) {
            let cascaded = self.session.take_cascade();
            self.lock_manager.end(tx);
            tracing::debug!(target: "corvid_cc::ss2pl", tx = %tx, op = "c", "commit after rollback");
            return Err(TxnError::CommitAborted { tx, cascaded });
        }

        let records: Vec<UndoEntry<V>> = self.session.undo().drain().collect();
        for record in records {
            record.unlink();
            if !record.is_replayed() {
                self.lock_manager
                    .unlock(tx, record.table().id(), record.offset());
            }
            if let Some(guard) = self.session.guard() {
                guard.defer_retire(record);
            }
        }

        self.session.finish();
        self.lock_manager.end(tx);
        self.lock_manager.metrics().record_commit();
        tracing::trace!(target: "corvid_cc::ss2pl", tx = %tx, op = "c", "commit");
        Ok(())
    }

    fn abort(&mut self, tx: TxId) {
        debug_assert!(tx.is_valid());
        if !self.session.is_dead(tx) {
            self.rollback(tx);
        }
    }
}

impl<V: Value> std::fmt::Debug for SsplCoordinator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsplCoordinator")
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corvid_error::TxnError;
    use corvid_storage::Table;

    use crate::epoch::EpochRegistry;
    use crate::ConcurrencyControl;

    use super::{LockManager, SsplCoordinator};

    fn coordinator() -> (SsplCoordinator<u64>, Arc<LockManager>) {
        let lm = Arc::new(LockManager::new());
        let registry = Arc::new(EpochRegistry::default());
        (SsplCoordinator::new(Arc::clone(&lm), registry), lm)
    }

    #[test]
    fn read_write_commit_round_trip() {
        let (mut coord, lm) = coordinator();
        let table = Arc::new(Table::new(0_u64, 4));

        let tx = coord.start();
        assert_eq!(coord.read(&table, 2, tx).unwrap(), 0);
        coord.write(&table, 2, 3, tx).unwrap();
        coord.commit(tx).unwrap();

        assert_eq!(table.snapshot(), vec![0, 0, 3, 0]);
        assert_eq!(lm.holder_count(table.id(), 2), 0);
        assert!(table.cell(2).accesses().is_empty());
        assert_eq!(lm.live_count(), 0);
    }

    #[test]
    fn abort_restores_the_prior_value_and_releases_locks() {
        let (mut coord, lm) = coordinator();
        let table = Arc::new(Table::new(7_u64, 2));

        let tx = coord.start();
        coord.write(&table, 0, 50, tx).unwrap();
        coord.write(&table, 0, 51, tx).unwrap();
        coord.abort(tx);

        assert_eq!(table.column().load(0), 7);
        assert_eq!(lm.holder_count(table.id(), 0), 0);
        assert!(table.cell(0).accesses().is_empty());
    }

    #[test]
    fn operations_after_rollback_report_a_dead_transaction() {
        let (mut coord, _lm) = coordinator();
        let table = Arc::new(Table::new(0_u64, 1));

        let tx = coord.start();
        coord.write(&table, 0, 1, tx).unwrap();
        coord.abort(tx);

        assert_eq!(
            coord.read(&table, 0, tx),
            Err(TxnError::DeadTransaction { tx })
        );
        assert!(matches!(
            coord.commit(tx),
            Err(TxnError::CommitAborted { cascaded, .. }) if cascaded.is_empty()
        ));
    }

    #[test]
    fn younger_writer_dies_on_an_elder_readers_cell() {
        let lm = Arc::new(LockManager::new());
        let registry = Arc::new(EpochRegistry::default());
        let mut elder: SsplCoordinator<u64> =
            SsplCoordinator::new(Arc::clone(&lm), Arc::clone(&registry));
        let mut younger: SsplCoordinator<u64> = SsplCoordinator::new(Arc::clone(&lm), registry);
        let table = Arc::new(Table::new(0_u64, 1));

        let t_old = elder.start();
        let t_young = younger.start();
        assert!(t_old < t_young);

        elder.read(&table, 0, t_old).unwrap();
        let err = younger.write(&table, 0, 9, t_young).unwrap_err();
        assert_eq!(err, TxnError::LockDenied { tx: t_young, offset: 0 });

        // The survivor upgrades once it is the sole holder again.
        elder.write(&table, 0, 5, t_old).unwrap();
        elder.commit(t_old).unwrap();
        assert_eq!(table.column().load(0), 5);
    }
}
