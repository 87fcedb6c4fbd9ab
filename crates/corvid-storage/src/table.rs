//! A [`Table`] bundles one value column with its per-cell bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

use corvid_types::TableId;

use crate::cache_aligned::CacheAligned;
use crate::cell::Cell;
use crate::column::{Column, Value};

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// One column of values plus the per-cell access bookkeeping the concurrency
/// strategies drive. Tables carry a process-unique id so shared strategy
/// state (lock-table slots) can key on `(table, offset)`.
pub struct Table<V> {
    id: TableId,
    column: Column<V>,
    cells: Box<[CacheAligned<Cell>]>,
}

impl<V: Value> Table<V> {
    /// Create a table of `len` cells, each holding `init`.
    #[must_use]
    pub fn new(init: V, len: usize) -> Self {
        Self::from_column(Column::new(init, len))
    }

    /// Create a table over explicit per-cell values.
    #[must_use]
    pub fn from_values(values: Vec<V>) -> Self {
        Self::from_column(Column::from_values(values))
    }

    fn from_column(column: Column<V>) -> Self {
        let len = column.len();
        Self {
            id: TableId::new(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed)),
            column,
            cells: (0..len).map(|_| CacheAligned::new(Cell::default())).collect(),
        }
    }

    /// Process-unique table id.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    /// Whether the table has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    /// The value column.
    #[must_use]
    pub fn column(&self) -> &Column<V> {
        &self.column
    }

    /// Bookkeeping for the cell at `offset`.
    #[must_use]
    pub fn cell(&self, offset: usize) -> &Cell {
        &self.cells[offset]
    }

    /// Copy out every cell value (diagnostics and tests).
    #[must_use]
    pub fn snapshot(&self) -> Vec<V> {
        self.column.snapshot()
    }
}

impl<V: Value> std::fmt::Debug for Table<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
