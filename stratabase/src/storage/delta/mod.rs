//! Delta subsystem - row-level mutation tracking over immutable base data
//!
//! Architecture:
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    DeltaTracker                        │
//! │  - ordered store list (oldest → newest) + active DMS  │
//! │  - routes writes, composes readers, drives flushes    │
//! ├──────────────────────┬────────────────────────────────┤
//! │   DeltaMemStore      │   DeltaFileReader              │
//! │   - concurrent       │   - immutable delta_<N> file   │
//! │     ordered inserts  │   - mmap random access         │
//! ├──────────────────────┴────────────────────────────────┤
//! │   DeltaIteratorMerger → DeltaApplier                  │
//! │   - per-store iterators applied in store order        │
//! │   - patches base ColumnBlocks, computes selection     │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Write path: `DeltaTracker::update` appends to the active DeltaMemStore.
//! Read path: `DeltaTracker::new_delta_iterator` snapshots the store list and
//! merges per-store iterators; `DeltaApplier` overlays them on base columns.
//! Flush: the active DMS is swapped out under the component lock, serialized
//! to a `delta_<N>` file with no lock held, then the file reader replaces the
//! parked DMS in its slot.

pub mod applier;
pub mod file;
pub mod iterator;
pub mod memstore;
pub mod mutation;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use applier::{ColumnSource, DeltaApplier, MemoryColumnSource, MergedBatch};
pub use file::{DeltaFileReader, DeltaFileWriter};
pub use iterator::{DeltaIterator, DeltaIteratorMerger, SortedDeltaIterator};
pub use memstore::DeltaMemStore;
pub use mutation::{ColumnUpdate, Mutation, RowChangeList, RowId};
pub use tracker::DeltaTracker;

use crate::schema::Schema;
use crate::storage::mvcc::MvccSnapshot;
use crate::Result;

/// Capability shared by the mutable in-memory store and immutable delta files
///
/// `is_row_deleted` is evaluated against the store's full committed content;
/// snapshot filtering happens in the iterators, not here.
pub trait DeltaStore: Send + Sync {
    /// Build a row-ordered iterator over this store's mutations
    fn new_delta_iterator(
        &self,
        projection: &Schema,
        snapshot: &MvccSnapshot,
    ) -> Result<Box<dyn DeltaIterator>>;

    /// Whether any recorded mutation deletes `row_idx`
    fn is_row_deleted(&self, row_idx: RowId) -> Result<bool>;

    /// Short diagnostic name for logs
    fn name(&self) -> String;
}
