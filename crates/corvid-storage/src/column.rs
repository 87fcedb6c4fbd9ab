//! Value storage: a random-access column of cells with atomic `replace`.

use parking_lot::Mutex;

/// Marker bound for values a [`Column`] can hold.
///
/// Values are copied in and out of cells; the coordinator keeps copies in its
/// undo log across suspension points, hence `Send + Sync + 'static`.
pub trait Value: Copy + Send + Sync + std::fmt::Debug + 'static {}

impl<T: Copy + Send + Sync + std::fmt::Debug + 'static> Value for T {}

/// A fixed-length column of values.
///
/// `replace` is atomic with respect to itself: concurrent replacements of the
/// same offset serialize, and each returns the value it displaced. Ordering
/// *across* operations on one cell is the ticket protocol's job
/// ([`crate::Cell`]), not the column's.
pub struct Column<V> {
    slots: Box<[Mutex<V>]>,
}

impl<V: Value> Column<V> {
    /// Create a column of `len` cells, each holding `init`.
    #[must_use]
    pub fn new(init: V, len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Mutex::new(init)).collect(),
        }
    }

    /// Create a column from explicit per-cell values.
    #[must_use]
    pub fn from_values(values: Vec<V>) -> Self {
        Self {
            slots: values.into_iter().map(Mutex::new).collect(),
        }
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the column has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Load the value at `offset`.
    #[must_use]
    pub fn load(&self, offset: usize) -> V {
        *self.slots[offset].lock()
    }

    /// Replace the value at `offset`, returning the prior value.
    pub fn replace(&self, offset: usize, new: V) -> V {
        std::mem::replace(&mut *self.slots[offset].lock(), new)
    }

    /// Copy out every cell (diagnostics and tests).
    #[must_use]
    pub fn snapshot(&self) -> Vec<V> {
        self.slots.iter().map(|slot| *slot.lock()).collect()
    }
}

impl<V: Value> std::fmt::Debug for Column<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column").field("len", &self.len()).finish()
    }
}
