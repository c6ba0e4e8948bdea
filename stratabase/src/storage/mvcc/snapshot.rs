//! MVCC snapshots - visibility predicate over transaction ids
//!
//! A snapshot captures which committed transactions a reader observes.
//! Transaction ids are allocated from a monotonically increasing counter, so
//! a snapshot taken at id T sees exactly the transactions with id <= T. Two
//! snapshots S1, S2 with T1 <= T2 therefore have nested visible sets, which
//! is what makes delete visibility monotonic across snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique transaction identifier
pub type TxnId = u64;

/// Global transaction ID generator
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next transaction id
pub fn next_txn_id() -> TxnId {
    NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst)
}

/// A point-in-time visibility predicate over transaction ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccSnapshot {
    /// Highest transaction id whose effects are visible
    read_txn: TxnId,
}

impl MvccSnapshot {
    /// Snapshot that sees every transaction up to and including `txn_id`
    pub fn at(txn_id: TxnId) -> Self {
        Self { read_txn: txn_id }
    }

    /// Snapshot that sees every committed transaction
    pub fn all_visible() -> Self {
        Self { read_txn: u64::MAX }
    }

    /// Snapshot that sees no transaction (ids start at 1)
    pub fn none_visible() -> Self {
        Self { read_txn: 0 }
    }

    /// Whether the effects of `txn_id` are visible to this snapshot
    #[inline]
    pub fn is_visible(&self, txn_id: TxnId) -> bool {
        txn_id <= self.read_txn
    }

    /// Whether `other`'s visible set is a subset of this snapshot's
    pub fn covers(&self, other: &MvccSnapshot) -> bool {
        other.read_txn <= self.read_txn
    }
}
