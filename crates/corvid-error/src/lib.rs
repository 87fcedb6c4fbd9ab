use corvid_types::TxId;
use thiserror::Error;

/// Failure surfaced by a transaction coordinator operation.
///
/// Every variant is terminal for the transaction it names: the coordinator
/// has already rolled the transaction back (restored values, unlinked
/// bookkeeping, released locks) before returning, and subsequent operations
/// on the same id report [`TxnError::DeadTransaction`]. Callers that want
/// the work done re-issue it under a fresh id from `start`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    /// Operation attempted on a transaction that already aborted.
    #[error("transaction {tx} is no longer alive")]
    DeadTransaction { tx: TxId },

    /// SS2PL: the lock manager denied a lock under wait-die and the
    /// requester self-aborted.
    #[error("transaction {tx} aborted: lock denied at offset {offset}")]
    LockDenied { tx: TxId, offset: usize },

    /// SGT: inserting the dependency edge for this operation would close a
    /// cycle, so the transaction self-aborted.
    #[error("transaction {tx} aborted: serialization cycle at offset {offset}")]
    CycleDetected { tx: TxId, offset: usize },

    /// SGT: a predecessor this transaction depended on aborted, and the
    /// abort cascaded here.
    #[error("transaction {tx} aborted: cascaded from a predecessor")]
    CascadeAborted { tx: TxId },

    /// The transaction could not commit. `cascaded` lists further victims
    /// the caller must also consider aborted.
    #[error("transaction {tx} failed to commit ({} cascaded)", cascaded.len())]
    CommitAborted { tx: TxId, cascaded: Vec<TxId> },
}

impl TxnError {
    /// The transaction the error is about.
    #[must_use]
    pub fn tx(&self) -> TxId {
        match self {
            Self::DeadTransaction { tx }
            | Self::LockDenied { tx, .. }
            | Self::CycleDetected { tx, .. }
            | Self::CascadeAborted { tx }
            | Self::CommitAborted { tx, .. } => *tx,
        }
    }

    /// Transactions aborted as a consequence of this failure, if any.
    #[must_use]
    pub fn cascaded(&self) -> &[TxId] {
        match self {
            Self::CommitAborted { cascaded, .. } => cascaded,
            _ => &[],
        }
    }
}
