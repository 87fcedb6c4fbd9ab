//! The per-transaction undo log.
//!
//! Every granted operation appends one entry. Entries carry enough to unlink
//! the operation's access record from its cell by exact ticket, and — for
//! writes — to restore the displaced value on abort. The log is a
//! preallocated slab reused across transactions on one session, so steady
//! state allocates nothing.

use std::sync::Arc;

use corvid_storage::{Table, Value};
use corvid_types::{Ticket, TxId};

/// One undo record.
#[derive(Debug, Clone)]
pub enum UndoEntry<V: Value> {
    /// A granted read: unlink-only.
    Read {
        table: Arc<Table<V>>,
        prv: Ticket,
        offset: usize,
        tx: TxId,
    },
    /// A granted write: unlink plus restore.
    Write {
        table: Arc<Table<V>>,
        prv: Ticket,
        offset: usize,
        tx: TxId,
        old: V,
        new: V,
        /// Set when this entry was produced by abort replay; replayed writes
        /// are never re-inverted.
        replayed: bool,
    },
}

impl<V: Value> UndoEntry<V> {
    /// The table the access touched.
    #[must_use]
    pub fn table(&self) -> &Arc<Table<V>> {
        match self {
            Self::Read { table, .. } | Self::Write { table, .. } => table,
        }
    }

    /// The cell offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        match self {
            Self::Read { offset, .. } | Self::Write { offset, .. } => *offset,
        }
    }

    /// The serialization ticket the access held.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Read { prv, .. } | Self::Write { prv, .. } => *prv,
        }
    }

    /// Whether this is a write record.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. })
    }

    /// Whether this record came from abort replay.
    #[must_use]
    pub fn is_replayed(&self) -> bool {
        matches!(self, Self::Write { replayed: true, .. })
    }

    /// Remove this record's access entry from its cell.
    pub fn unlink(&self) {
        self.table()
            .cell(self.offset())
            .accesses()
            .erase(self.ticket());
    }
}

/// Reverse-chronological undo log with a reusable slab.
#[derive(Debug)]
pub struct UndoLog<V: Value> {
    /// Chronological order; iterate back-to-front for undo.
    entries: Vec<UndoEntry<V>>,
}

impl<V: Value> UndoLog<V> {
    /// Pre-sized empty log.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a read record.
    pub fn push_read(&mut self, table: Arc<Table<V>>, prv: Ticket, offset: usize, tx: TxId) {
        self.entries.push(UndoEntry::Read {
            table,
            prv,
            offset,
            tx,
        });
    }

    /// Append a write record.
    #[allow(clippy::too_many_arguments)]
    pub fn push_write(
        &mut self,
        table: Arc<Table<V>>,
        prv: Ticket,
        offset: usize,
        tx: TxId,
        old: V,
        new: V,
        replayed: bool,
    ) {
        self.entries.push(UndoEntry::Write {
            table,
            prv,
            offset,
            tx,
            old,
            new,
            replayed,
        });
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in reverse-chronological order (newest first).
    pub fn iter_rev(&self) -> impl Iterator<Item = &UndoEntry<V>> {
        self.entries.iter().rev()
    }

    /// The writes to invert on abort, newest first: `(table, offset, old)`
    /// for every write not produced by replay.
    #[must_use]
    pub fn restore_work(&self) -> Vec<(Arc<Table<V>>, usize, V)> {
        self.iter_rev()
            .filter_map(|entry| match entry {
                UndoEntry::Write {
                    table,
                    offset,
                    old,
                    replayed: false,
                    ..
                } => Some((Arc::clone(table), *offset, *old)),
                _ => None,
            })
            .collect()
    }

    /// Drain every record, retaining the slab's capacity.
    pub fn drain(&mut self) -> std::vec::Drain<'_, UndoEntry<V>> {
        self.entries.drain(..)
    }

    /// Forget all records, retaining the slab's capacity.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl<V: Value> Default for UndoLog<V> {
    fn default() -> Self {
        Self::with_capacity(32)
    }
}
