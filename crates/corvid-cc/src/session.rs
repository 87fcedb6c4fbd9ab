//! Per-coordinator transaction state.
//!
//! Each worker thread owns one coordinator, and the coordinator owns one
//! [`Session`]: the id counter, the not-alive and cascade sets, the undo
//! slab, and the epoch-guard slot. Nothing in here is shared; the strategy
//! objects are the only cross-thread state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use corvid_storage::Value;
use corvid_types::{MAX_CORE_TAG, TxId};

use crate::epoch::{EpochGuard, EpochRegistry};
use crate::undo::UndoLog;

/// Hands each session a core tag in `0..=127`, wrapping if a process creates
/// more sessions than tags. Ids stay unique as long as no two same-tag
/// sessions run the same counter value, which wrapping preserves for any
/// realistic session count.
static NEXT_CORE_TAG: AtomicU8 = AtomicU8::new(0);

fn allocate_core_tag() -> u8 {
    NEXT_CORE_TAG.fetch_add(1, Ordering::Relaxed) & MAX_CORE_TAG
}

/// State owned by one coordinator.
pub struct Session<V: Value> {
    core_tag: u8,
    tx_counter: u64,
    not_alive: HashSet<TxId>,
    cascade: HashSet<TxId>,
    undo: UndoLog<V>,
    guard: Option<EpochGuard>,
    registry: Arc<EpochRegistry>,
}

impl<V: Value> Session<V> {
    /// New session pinned to a fresh core tag.
    #[must_use]
    pub fn new(registry: Arc<EpochRegistry>) -> Self {
        Self {
            core_tag: allocate_core_tag(),
            tx_counter: 0,
            not_alive: HashSet::new(),
            cascade: HashSet::new(),
            undo: UndoLog::default(),
            guard: None,
            registry,
        }
    }

    /// The session's core tag.
    #[must_use]
    pub fn core_tag(&self) -> u8 {
        self.core_tag
    }

    /// Open a transaction: fresh id, cleared cascade set, reset undo slab,
    /// epoch guard pinned.
    pub fn begin(&mut self) -> TxId {
        self.tx_counter += 1;
        let tx = TxId::from_parts(self.core_tag, self.tx_counter);
        self.cascade.clear();
        self.undo.reset();
        self.guard = Some(EpochGuard::enter(Arc::clone(&self.registry)));
        tx
    }

    /// Drop the epoch guard and forget any leftover records. The terminal
    /// step of commit and abort.
    pub fn finish(&mut self) {
        self.undo.reset();
        self.guard = None;
    }

    /// The undo log.
    pub fn undo(&mut self) -> &mut UndoLog<V> {
        &mut self.undo
    }

    /// The live epoch guard, present between `begin` and `finish`.
    #[must_use]
    pub fn guard(&self) -> Option<&EpochGuard> {
        self.guard.as_ref()
    }

    /// Mark `tx` dead (self- or cascade-aborted).
    pub fn mark_dead(&mut self, tx: TxId) {
        self.not_alive.insert(tx);
    }

    /// Whether `tx` is marked dead.
    #[must_use]
    pub fn is_dead(&self, tx: TxId) -> bool {
        self.not_alive.contains(&tx)
    }

    /// Remove a dead mark, reporting whether it was present.
    pub fn clear_dead(&mut self, tx: TxId) -> bool {
        self.not_alive.remove(&tx)
    }

    /// Record a transaction this one forced to cascade-abort.
    pub fn add_cascade(&mut self, tx: TxId) {
        self.cascade.insert(tx);
    }

    /// Cascade victims recorded so far.
    #[must_use]
    pub fn cascade(&self) -> &HashSet<TxId> {
        &self.cascade
    }

    /// Hand the cascade set to the caller (sorted for determinism).
    #[must_use]
    pub fn take_cascade(&mut self) -> Vec<TxId> {
        let mut victims: Vec<TxId> = self.cascade.drain().collect();
        victims.sort_unstable();
        victims
    }
}

impl<V: Value> std::fmt::Debug for Session<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("core_tag", &self.core_tag)
            .field("tx_counter", &self.tx_counter)
            .field("not_alive", &self.not_alive.len())
            .field("undo", &self.undo.len())
            .field("pinned", &self.guard.is_some())
            .finish()
    }
}
