//! Foundation types for the corvid transactional column store.
//!
//! Runtime machinery (cells, lock tables, the serialization graph) lives in
//! `corvid-storage` and `corvid-cc`; this crate defines the identifiers and
//! packed encodings those crates build on.

use std::fmt;

/// Number of low bits of a [`TxId`] holding the per-session counter.
pub const TX_COUNTER_BITS: u32 = 56;

/// Mask selecting the counter portion of a raw transaction id.
pub const TX_COUNTER_MASK: u64 = (1 << TX_COUNTER_BITS) - 1;

/// Highest core tag that still leaves the id representable in the 63-bit
/// payload of an [`AccessEntry`].
pub const MAX_CORE_TAG: u8 = 127;

/// A transaction identifier.
///
/// The top 8 bits carry the originating core tag (`0..=127`); the low 56 bits
/// carry a per-session monotonically increasing counter incremented at
/// `start`. The layout makes ids process-globally unique without any
/// cross-core synchronization, and the numeric order of ids from one session
/// is their start order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TxId(u64);

impl TxId {
    /// Assemble an id from a core tag and a session-local counter value.
    ///
    /// The counter must be non-zero: id zero is reserved as "no transaction"
    /// so packed access records stay invertible.
    #[inline]
    #[must_use]
    pub const fn from_parts(core: u8, counter: u64) -> Self {
        debug_assert!(core <= MAX_CORE_TAG);
        debug_assert!(counter & TX_COUNTER_MASK != 0);
        Self(((core as u64) << TX_COUNTER_BITS) | (counter & TX_COUNTER_MASK))
    }

    /// Reconstruct an id from its raw wire value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Originating core tag.
    #[inline]
    #[must_use]
    pub const fn core(self) -> u8 {
        (self.0 >> TX_COUNTER_BITS) as u8
    }

    /// Session-local counter portion.
    #[inline]
    #[must_use]
    pub const fn counter(self) -> u64 {
        self.0 & TX_COUNTER_MASK
    }

    /// Whether this is a real transaction id (non-zero).
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.core(), self.counter())
    }
}

/// Whether an access reads or writes its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    /// `true` for [`AccessMode::Write`].
    #[inline]
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Mask for the mode bit of a packed access record.
const ACCESS_WRITE_BIT: u64 = 1 << 63;

/// Mask for the transaction-id payload of a packed access record.
const ACCESS_TX_MASK: u64 = ACCESS_WRITE_BIT - 1;

/// A packed 64-bit access record: top bit is the mode (`1` = write), the low
/// 63 bits are the transaction id.
///
/// The encoding is reversible: `AccessEntry::encode(tx, mode)` followed by
/// `.tx()` / `.mode()` returns the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AccessEntry(u64);

impl AccessEntry {
    /// Pack a transaction id and mode into one word.
    #[inline]
    #[must_use]
    pub const fn encode(tx: TxId, mode: AccessMode) -> Self {
        match mode {
            AccessMode::Write => Self(ACCESS_WRITE_BIT | tx.get()),
            AccessMode::Read => Self(ACCESS_TX_MASK & tx.get()),
        }
    }

    /// Raw packed value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The recorded transaction id.
    #[inline]
    #[must_use]
    pub const fn tx(self) -> TxId {
        TxId::from_raw(self.0 & ACCESS_TX_MASK)
    }

    /// The recorded access mode.
    #[inline]
    #[must_use]
    pub const fn mode(self) -> AccessMode {
        if self.0 & ACCESS_WRITE_BIT != 0 {
            AccessMode::Write
        } else {
            AccessMode::Read
        }
    }

    /// Whether this record is a write access.
    #[inline]
    #[must_use]
    pub const fn is_write(self) -> bool {
        self.0 & ACCESS_WRITE_BIT != 0
    }
}

impl fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.is_write() { 'w' } else { 'r' };
        write!(f, "{}({})", op, self.tx())
    }
}

/// A per-cell serialization ticket handed out by `push_front` on the cell's
/// access list. Tickets are strictly increasing per cell and define the
/// cell-local order of operations.
pub type Ticket = u64;

/// A process-unique table identifier, used to key shared strategy state
/// (lock-table slots) across tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TableId(u64);

impl TableId {
    /// Wrap a raw table id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{AccessEntry, AccessMode, MAX_CORE_TAG, TX_COUNTER_MASK, TxId};

    #[test]
    fn tx_id_layout_round_trips() {
        let tx = TxId::from_parts(3, 41);
        assert_eq!(tx.core(), 3);
        assert_eq!(tx.counter(), 41);
        assert!(tx.is_valid());
        assert_eq!(format!("{tx}"), "3.41");
    }

    #[test]
    fn tx_ids_from_one_session_are_ordered_by_start() {
        let a = TxId::from_parts(5, 1);
        let b = TxId::from_parts(5, 2);
        assert!(a < b);
    }

    #[test]
    fn core_tags_partition_the_id_space() {
        let a = TxId::from_parts(0, 7);
        let b = TxId::from_parts(1, 7);
        assert_ne!(a, b);
        assert_eq!(a.counter(), b.counter());
    }

    #[test]
    fn access_entry_mode_bit_is_the_top_bit() {
        let tx = TxId::from_parts(MAX_CORE_TAG, TX_COUNTER_MASK);
        let w = AccessEntry::encode(tx, AccessMode::Write);
        let r = AccessEntry::encode(tx, AccessMode::Read);
        assert!(w.is_write());
        assert!(!r.is_write());
        assert_eq!(w.tx(), tx);
        assert_eq!(r.tx(), tx);
    }

    #[test]
    fn tx_id_serde_round_trips() {
        let tx = TxId::from_parts(9, 1234);
        let json = serde_json::to_string(&tx).unwrap();
        let back: TxId = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }

    proptest! {
        #[test]
        fn prop_access_entry_is_reversible(
            core in 0_u8..=MAX_CORE_TAG,
            counter in 1_u64..=TX_COUNTER_MASK,
            write in proptest::bool::ANY,
        ) {
            let tx = TxId::from_parts(core, counter);
            let mode = if write { AccessMode::Write } else { AccessMode::Read };
            let entry = AccessEntry::encode(tx, mode);
            prop_assert_eq!(entry.tx(), tx);
            prop_assert_eq!(entry.mode().is_write(), write);
        }
    }
}
