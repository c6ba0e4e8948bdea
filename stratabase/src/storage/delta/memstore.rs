//! DeltaMemStore - in-memory mutable store of pending mutations
//!
//! Holds every mutation applied since the last flush, ordered by
//! (row index, transaction id). Inserts go through a concurrent skip list so
//! writer threads append in parallel while readers iterate, with no
//! store-wide lock on the append path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use super::file::DeltaFileWriter;
use super::iterator::{DeltaIterator, SortedDeltaIterator};
use super::mutation::{Mutation, RowChangeList, RowId};
use super::DeltaStore;
use crate::schema::Schema;
use crate::storage::mvcc::{MvccSnapshot, TxnId};
use crate::Result;

/// Sort key for pending mutations
///
/// `seq` disambiguates repeated updates to the same row by the same
/// transaction, preserving insertion order between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DeltaKey {
    row_idx: RowId,
    txn_id: TxnId,
    seq: u64,
}

/// In-memory mutable delta store for the active write window
pub struct DeltaMemStore {
    entries: SkipMap<DeltaKey, RowChangeList>,
    next_seq: AtomicU64,
}

impl DeltaMemStore {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Record a mutation. Safe to call concurrently from multiple writers.
    pub fn update(&self, txn_id: TxnId, row_idx: RowId, change: RowChangeList) {
        let key = DeltaKey {
            row_idx,
            txn_id,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(key, change);
    }

    /// Number of recorded mutations
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any recorded mutation deletes `row_idx`, ignoring snapshots
    pub fn row_deleted(&self, row_idx: RowId) -> bool {
        let lo = DeltaKey {
            row_idx,
            txn_id: 0,
            seq: 0,
        };
        let hi = DeltaKey {
            row_idx,
            txn_id: u64::MAX,
            seq: u64::MAX,
        };
        self.entries
            .range(lo..=hi)
            .any(|entry| entry.value().is_delete())
    }

    /// Point-in-time copy of all mutations in (row, txn, insertion) order
    pub fn snapshot_mutations(&self) -> Vec<Mutation> {
        self.entries
            .iter()
            .map(|entry| {
                let key = entry.key();
                Mutation::new(key.row_idx, key.txn_id, entry.value().clone())
            })
            .collect()
    }

    /// Write every mutation through `writer` in row/txn order.
    ///
    /// This is the single reader of the store during a flush; callers must
    /// not destroy the store while it runs.
    pub fn flush_to(&self, writer: &mut DeltaFileWriter) -> Result<()> {
        for entry in self.entries.iter() {
            let key = entry.key();
            let mutation = Mutation::new(key.row_idx, key.txn_id, entry.value().clone());
            writer.append(&mutation)?;
        }
        Ok(())
    }
}

impl Default for DeltaMemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaStore for DeltaMemStore {
    fn new_delta_iterator(
        &self,
        projection: &Schema,
        snapshot: &MvccSnapshot,
    ) -> Result<Box<dyn DeltaIterator>> {
        let mutations = Arc::new(self.snapshot_mutations());
        Ok(Box::new(SortedDeltaIterator::new(
            mutations,
            projection.clone(),
            snapshot.clone(),
        )))
    }

    fn is_row_deleted(&self, row_idx: RowId) -> Result<bool> {
        Ok(self.row_deleted(row_idx))
    }

    fn name(&self) -> String {
        format!("DMS({} deltas)", self.count())
    }
}
