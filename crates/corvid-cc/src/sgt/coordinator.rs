//! The SGT transaction coordinator.
//!
//! Reads insert `WriteRead` edges from prior writers of the cell; writes
//! first wait out any uncommitted prior writer (inserting the `WriteWrite`
//! edge, releasing the cell ticket and retrying from the top), then insert
//! `ReadWrite` edges from prior readers. Any edge that would close a cycle
//! aborts the transaction on the spot. Commit passes the barrier — every
//! incoming edge source committed — before the node is marked committed and
//! unlinked.

use std::sync::Arc;

use corvid_error::TxnError;
use corvid_storage::{Table, Value};
use corvid_types::{AccessEntry, AccessMode, TxId};

use crate::config::CcConfig;
use crate::epoch::EpochRegistry;
use crate::metrics::CcMetrics;
use crate::session::Session;
use crate::sgt::graph::{DependencyKind, SerializationGraph};
use crate::undo::UndoEntry;
use crate::ConcurrencyControl;

/// Per-thread SGT coordinator over a shared [`SerializationGraph`].
pub struct SgtCoordinator<V: Value> {
    graph: Arc<SerializationGraph>,
    config: CcConfig,
    session: Session<V>,
}

impl<V: Value> SgtCoordinator<V> {
    /// Coordinator with default tunables.
    #[must_use]
    pub fn new(graph: Arc<SerializationGraph>, registry: Arc<EpochRegistry>) -> Self {
        Self::with_config(graph, registry, CcConfig::default())
    }

    /// Coordinator with explicit tunables.
    #[must_use]
    pub fn with_config(
        graph: Arc<SerializationGraph>,
        registry: Arc<EpochRegistry>,
        config: CcConfig,
    ) -> Self {
        Self {
            graph,
            config,
            session: Session::new(registry),
        }
    }

    /// The shared strategy object.
    #[must_use]
    pub fn graph(&self) -> &Arc<SerializationGraph> {
        &self.graph
    }

    /// Strategy metrics.
    #[must_use]
    pub fn metrics(&self) -> &CcMetrics {
        self.graph.metrics()
    }

    /// The unguarded replay path: swap the cell back under its ticket
    /// without consulting the graph, recording the replay so its access
    /// entry is unlinked at terminal cleanup.
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

    /// Roll `tx` back: invert its writes, cascade along its data edges, then
    /// unlink and retire every record and the graph node.
    fn rollback(&mut self, tx: TxId) {
        self.session.mark_dead(tx);
        tracing::debug!(target: "corvid_cc::sgt", tx = %tx, op = "a", "rollback");

        for (table, offset, old) in self.session.undo().restore_work() {
            self.restore_write(&table, offset, old, tx);
        }

        let mut victims = Vec::new();
        self.graph.propagate_abort(tx, &mut victims);
        for victim in victims {
            self.session.add_cascade(victim);
        }

        let records: Vec<UndoEntry<V>> = self.session.undo().drain().collect();
        for record in records {
            record.unlink();
            if let Some(guard) = self.session.guard() {
                guard.defer_retire(record);
            }
        }

        self.graph.remove_node(tx, self.session.guard());
        self.session.finish();
        self.graph.metrics().record_abort();
    }

    /// Abort because a cascading predecessor aborted.
    fn cascade_out(&mut self, tx: TxId) -> TxnError {
        self.rollback(tx);
        TxnError::CascadeAborted { tx }
    }
}

impl<V: Value> ConcurrencyControl<V> for SgtCoordinator<V> {
    fn start(&mut self) -> TxId {
        let tx = self.session.begin();
        self.graph.create_node(tx);
        self.graph.metrics().record_start();
        tracing::trace!(target: "corvid_cc::sgt", tx = %tx, "start");
        tx
    }

    fn read(&mut self, table: &Arc<Table<V>>, offset: usize, tx: TxId) -> Result<V, TxnError> {
        debug_assert!(tx.is_valid());
        debug_assert!(offset < table.len());

        if self.session.is_dead(tx) {
            return Err(TxnError::DeadTransaction { tx });
        }
        if self.graph.needs_abort(tx) {
            return Err(self.cascade_out(tx));
        }

        let cell = table.cell(offset);
        let prv = cell.acquire(
            AccessEntry::encode(tx, AccessMode::Read),
            self.config.spin_yield_threshold,
        );

        // Records before our ticket were inserted before our turn arrived,
        // so the snapshot is complete below `prv`.
        let mut cyclic = false;
        for (ticket, record) in cell.accesses().snapshot() {
            if ticket < prv && record.is_write() && record.tx() != tx {
                if !self
                    .graph
                    .insert_and_check(record.tx(), tx, DependencyKind::WriteRead)
                {
                    cyclic = true;
                }
            }
        }
        tracing::trace!(
            target: "corvid_cc::sgt",
            tx = %tx,
            prv,
            table = %table.id(),
            offset,
            op = "r",
            "read"
        );

        if cyclic {
            cell.abandon(prv);
            self.rollback(tx);
            return Err(TxnError::CycleDetected { tx, offset });
        }

        let value = table.column().load(offset);
        cell.release(prv);
        self.session
            .undo()
            .push_read(Arc::clone(table), prv, offset, tx);
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

        let cell = table.cell(offset);
        loop {
            if self.session.is_dead(tx) {
                return Err(TxnError::DeadTransaction { tx });
            }
            if self.graph.needs_abort(tx) {
                return Err(self.cascade_out(tx));
            }

            let prv = cell.acquire(
                AccessEntry::encode(tx, AccessMode::Write),
                self.config.spin_yield_threshold,
            );
            let snapshot = cell.accesses().snapshot();

            // First pass: an uncommitted prior writer must reach its own
            // terminal call before we overwrite it. Insert the ww edge, then
            // release the cell and retry from the top.
            let mut cyclic = false;
            let mut wait = false;
            for (ticket, record) in &snapshot {
                if *ticket < prv
                    && record.is_write()
                    && record.tx() != tx
                    && !self.graph.is_finished(record.tx())
                {
                    if !self
                        .graph
                        .insert_and_check(record.tx(), tx, DependencyKind::WriteWrite)
                    {
                        cyclic = true;
                    }
                    wait = true;
                }
            }

            if cyclic {
                cell.abandon(prv);
                self.rollback(tx);
                return Err(TxnError::CycleDetected { tx, offset });
            }
            if wait {
                cell.abandon(prv);
                self.graph.metrics().record_wait_retry();
                std::thread::yield_now();
                continue;
            }

            // Second pass: order ourselves after every remaining prior
            // accessor. Prior writers are finished by now, so this inserts
            // anti-dependency edges from prior readers.
            for (ticket, record) in &snapshot {
                if *ticket < prv && record.tx() != tx {
                    let kind = if record.is_write() {
                        DependencyKind::WriteWrite
                    } else {
                        DependencyKind::ReadWrite
                    };
                    if !self.graph.insert_and_check(record.tx(), tx, kind) {
                        cyclic = true;
                    }
                }
            }

            if cyclic {
                cell.abandon(prv);
                self.rollback(tx);
                return Err(TxnError::CycleDetected { tx, offset });
            }

            let old = table.column().replace(offset, value);
            cell.release(prv);
            self.session
                .undo()
                .push_write(Arc::clone(table), prv, offset, tx, old, value, false);
            tracing::trace!(
                target: "corvid_cc::sgt",
                tx = %tx,
                prv,
                table = %table.id(),
                offset,
                op = "w",
                "write"
            );
            return Ok(());
        }
    }

    fn commit(&mut self, tx: TxId) -> Result<(), TxnError> {
        debug_assert!(tx.is_valid());

        if self.session.clear_dead(tx) {
            let cascaded = self.session.take_cascade();
            tracing::debug!(target: "corvid_cc::sgt", tx = %tx, op = "c", "commit after rollback");
            return Err(TxnError::CommitAborted { tx, cascaded });
        }

        // Commit barrier: wait until every incoming edge source has
        // committed, re-checking for a cascaded abort each pass.
        let mut spins = 0_u32;
        loop {
            if self.graph.needs_abort(tx) {
                self.rollback(tx);
                self.session.clear_dead(tx);
                let cascaded = self.session.take_cascade();
                return Err(TxnError::CommitAborted { tx, cascaded });
            }
            if self.graph.commit_ready(tx) {
                break;
            }
            if spins >= self.config.spin_yield_threshold {
                std::thread::yield_now();
            } else {
                spins += 1;
                std::hint::spin_loop();
            }
        }

        self.graph.set_committed(tx);

        let records: Vec<UndoEntry<V>> = self.session.undo().drain().collect();
        for record in records {
            record.unlink();
            if let Some(guard) = self.session.guard() {
                guard.defer_retire(record);
            }
        }

        self.graph.remove_node(tx, self.session.guard());
        self.session.finish();
        self.graph.metrics().record_commit();
        tracing::trace!(target: "corvid_cc::sgt", tx = %tx, op = "c", "commit");
        Ok(())
    }

    fn abort(&mut self, tx: TxId) {
        debug_assert!(tx.is_valid());
        if !self.session.is_dead(tx) {
            self.rollback(tx);
        }
    }
}

impl<V: Value> std::fmt::Debug for SgtCoordinator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SgtCoordinator")
            .field("session", &self.session)
            .finish()
    }
}
