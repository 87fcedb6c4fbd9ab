//! Per-cell bookkeeping: the ordered access list and the `lsn` ticket lock.
//!
//! An operation on a cell first registers its packed access record with
//! [`AccessList::push_front`], which assigns a strictly increasing ticket,
//! then spins until `lsn` reaches that ticket. Holding the turn, it performs
//! its conflict check, data action and bookkeeping, and finally stores
//! `ticket + 1` into `lsn` to release the next waiter — on every exit path,
//! including aborts and retries. This is the only cross-transaction
//! synchronization on a single cell; different cells are fully independent.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use corvid_types::{AccessEntry, Ticket};

/// Spin iterations on a busy ticket before yielding the thread.
pub const DEFAULT_SPIN_YIELD_THRESHOLD: u32 = 10_000;

/// Inline capacity of an access list; spills to the heap only under heavy
/// same-cell concurrency.
const ACCESS_INLINE: usize = 4;

/// One recorded access: the ticket that serializes it and the packed record.
pub type AccessSlot = (Ticket, AccessEntry);

#[derive(Default)]
struct AccessListInner {
    next_ticket: Ticket,
    /// Newest first.
    entries: SmallVec<[AccessSlot; ACCESS_INLINE]>,
}

/// Ordered list of access records for one cell.
///
/// Ticket assignment and insertion happen under one lock, so any record with
/// a ticket below an operation's own is already present by the time that
/// operation's turn arrives.
#[derive(Default)]
pub struct AccessList {
    inner: Mutex<AccessListInner>,
}

impl AccessList {
    /// Register an access record, returning its ticket.
    pub fn push_front(&self, entry: AccessEntry) -> Ticket {
        let mut inner = self.inner.lock();
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.entries.insert(0, (ticket, entry));
        ticket
    }

    /// Remove the record registered under `ticket`.
    ///
    /// Returns `false` if no such record exists (already erased).
    pub fn erase(&self, ticket: Ticket) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.iter().position(|(t, _)| *t == ticket) {
            Some(pos) => {
                inner.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Copy out the current records, newest first.
    #[must_use]
    pub fn snapshot(&self) -> SmallVec<[AccessSlot; ACCESS_INLINE]> {
        self.inner.lock().entries.clone()
    }

    /// Number of registered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no records are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Highest ticket handed out so far, if any.
    #[must_use]
    pub fn last_ticket(&self) -> Option<Ticket> {
        let inner = self.inner.lock();
        inner.next_ticket.checked_sub(1)
    }
}

/// Per-cell bookkeeping: access list plus the `lsn` ticket lock.
#[derive(Default)]
pub struct Cell {
    accesses: AccessList,
    lsn: AtomicU64,
}

impl Cell {
    /// The cell's access list.
    #[must_use]
    pub fn accesses(&self) -> &AccessList {
        &self.accesses
    }

    /// Current `lsn` value (the ticket whose turn it is).
    #[must_use]
    pub fn lsn(&self) -> u64 {
        self.lsn.load(Ordering::SeqCst)
    }

    /// Register `entry` and wait for its turn. Returns the ticket.
    pub fn acquire(&self, entry: AccessEntry, spin_yield_threshold: u32) -> Ticket {
        let ticket = self.accesses.push_front(entry);
        self.wait_turn(ticket, spin_yield_threshold);
        ticket
    }

    /// Spin until `lsn` reaches `ticket`, yielding once the spin budget is
    /// exhausted.
    pub fn wait_turn(&self, ticket: Ticket, spin_yield_threshold: u32) {
        let mut spins = 0_u32;
        while self.lsn.load(Ordering::SeqCst) != ticket {
            if spins >= spin_yield_threshold {
                std::thread::yield_now();
            } else {
                spins += 1;
                std::hint::spin_loop();
            }
        }
    }

    /// Release the turn held under `ticket`, admitting the next waiter.
    pub fn release(&self, ticket: Ticket) {
        self.lsn.store(ticket + 1, Ordering::SeqCst);
    }

    /// Drop the record for `ticket` and release its turn in one step — the
    /// retry and abort exit paths.
    pub fn abandon(&self, ticket: Ticket) {
        self.accesses.erase(ticket);
        self.release(ticket);
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("lsn", &self.lsn())
            .field("accesses", &self.accesses.len())
            .finish()
    }
}
