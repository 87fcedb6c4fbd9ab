//! Shared/exclusive row locks with wait-die deadlock avoidance.
//!
//! Lock slots live in a sharded hash table keyed by `(table, offset)`.
//! Shards are cache-line padded so unrelated slots never false-share.
//!
//! Slot invariants:
//! - `holders` is non-empty iff the slot is held; each holder carries a grant
//!   count (one per granted operation, released one-by-one from undo replay).
//! - `exclusive` implies a single holder.
//! - A slot is removed from its shard once it has neither holders nor
//!   registered waiters.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use smallvec::SmallVec;

use corvid_storage::CacheAligned;
use corvid_types::{TableId, TxId};

use crate::metrics::CcMetrics;

/// Number of lock-table shards.
pub const LOCK_TABLE_SHARDS: usize = 64;

type LockKey = (TableId, usize);
type LockShard = CacheAligned<Mutex<HashMap<LockKey, LockState>>>;

/// Outcome of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDecision {
    /// Granted; the grant count was incremented.
    Granted,
    /// Incompatible, but every conflicting holder is younger than the
    /// requester: spin and retry (wait-die "wait" arm).
    Wait,
    /// Incompatible with an older holder: the requester must self-abort
    /// (wait-die "die" arm).
    Die,
}

#[derive(Debug, Default)]
struct LockState {
    exclusive: bool,
    /// `(holder, grant_count)`, at most one entry per transaction.
    holders: SmallVec<[(TxId, u32); 2]>,
    waiters: SmallVec<[TxId; 2]>,
}

impl LockState {
    fn holder_index(&self, tx: TxId) -> Option<usize> {
        self.holders.iter().position(|(holder, _)| *holder == tx)
    }

    fn drop_waiter(&mut self, tx: TxId) {
        if let Some(pos) = self.waiters.iter().position(|w| *w == tx) {
            self.waiters.remove(pos);
        }
    }
}

/// The shared SS2PL strategy object.
pub struct LockManager {
    shards: Box<[LockShard; LOCK_TABLE_SHARDS]>,
    live: Mutex<HashSet<TxId>>,
    metrics: CcMetrics,
}

impl LockManager {
    /// Create an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: Box::new(std::array::from_fn(|_| {
                CacheAligned::new(Mutex::new(HashMap::new()))
            })),
            live: Mutex::new(HashSet::new()),
            metrics: CcMetrics::default(),
        }
    }

    /// Strategy metrics.
    #[must_use]
    pub fn metrics(&self) -> &CcMetrics {
        &self.metrics
    }

    /// Register a transaction as live.
    pub fn start(&self, tx: TxId) {
        self.live.lock().insert(tx);
    }

    /// Deregister a transaction.
    pub fn end(&self, tx: TxId) {
        self.live.lock().remove(&tx);
    }

    /// Number of live transactions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    fn shard(&self, key: LockKey) -> &Mutex<HashMap<LockKey, LockState>> {
        let mix = key.0.get().wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ key.1 as u64;
        &self.shards[(mix as usize) & (LOCK_TABLE_SHARDS - 1)]
    }

    /// Request a shared (`exclusive == false`) or exclusive lock.
    ///
    /// Grant rules: readers join readers; a transaction re-acquiring a slot
    /// it already holds is granted; upgrading to exclusive is granted only
    /// to a sole holder. Incompatible requests are decided by wait-die on
    /// transaction age (smaller id = older).
    pub fn try_lock(&self, tx: TxId, exclusive: bool, table: TableId, offset: usize) -> LockDecision {
        debug_assert!(tx.is_valid());
        let key = (table, offset);
        let mut shard = self.shard(key).lock();
        let state = shard.entry(key).or_default();

        let compatible = match state.holder_index(tx) {
            _ if state.holders.is_empty() => true,
            Some(_) if state.holders.len() == 1 => true,
            Some(_) => !exclusive && !state.exclusive,
            None => !exclusive && !state.exclusive,
        };

        if compatible {
            match state.holder_index(tx) {
                Some(idx) => state.holders[idx].1 += 1,
                None => state.holders.push((tx, 1)),
            }
            if exclusive {
                state.exclusive = true;
            }
            state.drop_waiter(tx);
            return LockDecision::Granted;
        }

        let blocked_by_elder = state
            .holders
            .iter()
            .any(|(holder, _)| *holder != tx && *holder < tx);

        if blocked_by_elder {
            state.drop_waiter(tx);
            tracing::debug!(
                target: "corvid_cc::ss2pl",
                tx = %tx,
                table = %table,
                offset,
                "lock denied by wait-die"
            );
            LockDecision::Die
        } else {
            if !state.waiters.contains(&tx) {
                state.waiters.push(tx);
            }
            LockDecision::Wait
        }
    }

    /// Release one grant of `tx` on the slot.
    pub fn unlock(&self, tx: TxId, table: TableId, offset: usize) {
        let key = (table, offset);
        let mut shard = self.shard(key).lock();
        let Some(state) = shard.get_mut(&key) else {
            debug_assert!(false, "unlock of an unheld slot");
            return;
        };
        let Some(idx) = state.holder_index(tx) else {
            debug_assert!(false, "unlock by a non-holder");
            return;
        };

        state.holders[idx].1 -= 1;
        if state.holders[idx].1 == 0 {
            state.holders.remove(idx);
        }
        if state.holders.is_empty() {
            state.exclusive = false;
            if state.waiters.is_empty() {
                shard.remove(&key);
            }
        }
    }

    /// Number of transactions holding the slot (diagnostics and tests).
    #[must_use]
    pub fn holder_count(&self, table: TableId, offset: usize) -> usize {
        let key = (table, offset);
        self.shard(key)
            .lock()
            .get(&key)
            .map_or(0, |state| state.holders.len())
    }

    /// Number of registered waiters on the slot (diagnostics and tests).
    #[must_use]
    pub fn waiter_count(&self, table: TableId, offset: usize) -> usize {
        let key = (table, offset);
        self.shard(key)
            .lock()
            .get(&key)
            .map_or(0, |state| state.waiters.len())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use corvid_types::{TableId, TxId};

    use super::{LockDecision, LockManager};

    const TABLE: TableId = TableId::new(1);

    fn tx(counter: u64) -> TxId {
        TxId::from_parts(0, counter)
    }

    #[test]
    fn readers_share_and_writers_exclude() {
        let lm = LockManager::new();
        let (old, young) = (tx(1), tx(2));

        assert_eq!(lm.try_lock(old, false, TABLE, 0), LockDecision::Granted);
        assert_eq!(lm.try_lock(young, false, TABLE, 0), LockDecision::Granted);
        assert_eq!(lm.holder_count(TABLE, 0), 2);

        // A younger writer blocked by an older reader dies.
        assert_eq!(lm.try_lock(young, true, TABLE, 0), LockDecision::Die);
        // An older writer blocked by a younger reader waits.
        assert_eq!(lm.try_lock(old, true, TABLE, 0), LockDecision::Wait);
        assert_eq!(lm.waiter_count(TABLE, 0), 1);
    }

    #[test]
    fn sole_holder_upgrades_and_reenters() {
        let lm = LockManager::new();
        let t = tx(1);

        assert_eq!(lm.try_lock(t, false, TABLE, 3), LockDecision::Granted);
        assert_eq!(lm.try_lock(t, true, TABLE, 3), LockDecision::Granted);
        assert_eq!(lm.try_lock(t, false, TABLE, 3), LockDecision::Granted);

        // Another transaction is excluded even for reads.
        assert_eq!(lm.try_lock(tx(2), false, TABLE, 3), LockDecision::Die);

        lm.unlock(t, TABLE, 3);
        lm.unlock(t, TABLE, 3);
        assert_eq!(lm.holder_count(TABLE, 3), 1);
        lm.unlock(t, TABLE, 3);
        assert_eq!(lm.holder_count(TABLE, 3), 0);

        // Fully released: anyone may lock again.
        assert_eq!(lm.try_lock(tx(2), true, TABLE, 3), LockDecision::Granted);
    }

    #[test]
    fn waiter_is_admitted_after_release() {
        let lm = LockManager::new();
        let (old, young) = (tx(1), tx(2));

        assert_eq!(lm.try_lock(young, true, TABLE, 7), LockDecision::Granted);
        assert_eq!(lm.try_lock(old, true, TABLE, 7), LockDecision::Wait);

        lm.unlock(young, TABLE, 7);
        assert_eq!(lm.try_lock(old, true, TABLE, 7), LockDecision::Granted);
        assert_eq!(lm.waiter_count(TABLE, 7), 0);
    }

    #[test]
    fn slots_are_independent_per_table_and_offset() {
        let lm = LockManager::new();
        let other = TableId::new(2);

        assert_eq!(lm.try_lock(tx(1), true, TABLE, 0), LockDecision::Granted);
        assert_eq!(lm.try_lock(tx(2), true, TABLE, 1), LockDecision::Granted);
        assert_eq!(lm.try_lock(tx(3), true, other, 0), LockDecision::Granted);
    }

    #[test]
    fn liveness_set_tracks_start_and_end() {
        let lm = LockManager::new();
        lm.start(tx(1));
        lm.start(tx(2));
        assert_eq!(lm.live_count(), 2);
        lm.end(tx(1));
        lm.end(tx(1));
        assert_eq!(lm.live_count(), 1);
    }
}
