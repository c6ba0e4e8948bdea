//! Delta iterators - row-ordered application of mutations to column batches
//!
//! A delta iterator walks one store's mutations over a row window and applies
//! them to in-flight column blocks. The merger composes the iterators of
//! every store in store-list order (oldest to newest), so later stores
//! overwrite earlier ones and the final cell value reflects the most recent
//! committed update.

use std::ops::Range;
use std::sync::Arc;

use super::mutation::{Mutation, RowId};
use super::DeltaStore;
use crate::data::{ColumnBlock, SelectionVector};
use crate::schema::Schema;
use crate::storage::mvcc::MvccSnapshot;
use crate::Result;

/// Row-ordered iterator over one or more delta stores
pub trait DeltaIterator: Send {
    /// Prepare the iterator for use
    fn init(&mut self) -> Result<()>;

    /// Position the iterator at `row_idx`
    fn seek_to_ordinal(&mut self, row_idx: RowId) -> Result<()>;

    /// Prime the next `nrows` rows from the current position
    fn prepare_batch(&mut self, nrows: usize) -> Result<()>;

    /// Overwrite `dst` slots with updates to column `col_idx` in the batch
    fn apply_updates(&mut self, col_idx: usize, dst: &mut ColumnBlock) -> Result<()>;

    /// Clear selection bits for rows deleted in the batch
    fn apply_deletes(&mut self, sel: &mut SelectionVector) -> Result<()>;

    /// Append the batch's visible mutations to `dst`
    fn collect_mutations(&mut self, dst: &mut Vec<Mutation>) -> Result<()>;
}

// ============================================================================
// Single-store iterator
// ============================================================================

/// Iterator over an ordered, immutable snapshot of one store's mutations
///
/// Both store variants produce this: the mem store materializes a
/// point-in-time copy of its skip list, the file reader shares its decoded
/// records. Snapshot visibility is filtered at application time, so the
/// underlying batch can be shared between readers with different snapshots.
pub struct SortedDeltaIterator {
    mutations: Arc<Vec<Mutation>>,
    projection: Schema,
    snapshot: MvccSnapshot,
    /// Next row the iterator will prepare
    cur_row: RowId,
    /// First row of the prepared batch
    batch_start: RowId,
    /// Rows in the prepared batch
    batch_rows: usize,
    /// Span of `mutations` covering the prepared batch
    window: Range<usize>,
    prepared: bool,
}

impl SortedDeltaIterator {
    pub fn new(mutations: Arc<Vec<Mutation>>, projection: Schema, snapshot: MvccSnapshot) -> Self {
        Self {
            mutations,
            projection,
            snapshot,
            cur_row: 0,
            batch_start: 0,
            batch_rows: 0,
            window: 0..0,
            prepared: false,
        }
    }

    fn visible_in_window(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations[self.window.clone()]
            .iter()
            .filter(|m| self.snapshot.is_visible(m.txn_id))
    }
}

impl DeltaIterator for SortedDeltaIterator {
    fn init(&mut self) -> Result<()> {
        self.cur_row = 0;
        self.prepared = false;
        Ok(())
    }

    fn seek_to_ordinal(&mut self, row_idx: RowId) -> Result<()> {
        self.cur_row = row_idx;
        self.prepared = false;
        Ok(())
    }

    fn prepare_batch(&mut self, nrows: usize) -> Result<()> {
        self.batch_start = self.cur_row;
        self.batch_rows = nrows;
        let end_row = self.batch_start + nrows as RowId;

        let lo = self
            .mutations
            .partition_point(|m| m.row_idx < self.batch_start);
        let hi = self.mutations.partition_point(|m| m.row_idx < end_row);
        self.window = lo..hi;

        self.cur_row = end_row;
        self.prepared = true;
        Ok(())
    }

    fn apply_updates(&mut self, col_idx: usize, dst: &mut ColumnBlock) -> Result<()> {
        debug_assert!(self.prepared, "prepare_batch not called");
        debug_assert!(dst.len() >= self.batch_rows);
        debug_assert!(col_idx < self.projection.column_count());

        let batch_start = self.batch_start;
        for m in self.mutations[self.window.clone()].iter() {
            if !self.snapshot.is_visible(m.txn_id) {
                continue;
            }
            for update in m.change.updates() {
                if update.col_idx == col_idx {
                    dst.set((m.row_idx - batch_start) as usize, update.value.clone());
                }
            }
        }
        Ok(())
    }

    fn apply_deletes(&mut self, sel: &mut SelectionVector) -> Result<()> {
        debug_assert!(self.prepared, "prepare_batch not called");
        debug_assert!(sel.nrows() >= self.batch_rows);

        let batch_start = self.batch_start;
        for m in self.visible_in_window() {
            if m.change.is_delete() {
                sel.unset((m.row_idx - batch_start) as usize);
            }
        }
        Ok(())
    }

    fn collect_mutations(&mut self, dst: &mut Vec<Mutation>) -> Result<()> {
        debug_assert!(self.prepared, "prepare_batch not called");
        dst.extend(self.visible_in_window().cloned());
        Ok(())
    }
}

// ============================================================================
// Merger
// ============================================================================

/// DeltaIterator that combines other DeltaIterators, applying deltas from
/// each in store-list order
pub struct DeltaIteratorMerger {
    iters: Vec<Box<dyn DeltaIterator>>,
}

impl DeltaIteratorMerger {
    /// Build one iterator over `stores` in order.
    ///
    /// With a single input store the unwrapped iterator is returned directly;
    /// no merging overhead is paid.
    pub fn create(
        stores: &[Arc<dyn DeltaStore>],
        projection: &Schema,
        snapshot: &MvccSnapshot,
    ) -> Result<Box<dyn DeltaIterator>> {
        let mut iters = Vec::with_capacity(stores.len());
        for store in stores {
            iters.push(store.new_delta_iterator(projection, snapshot)?);
        }

        if iters.len() == 1 {
            return Ok(iters.pop().unwrap());
        }

        Ok(Box::new(DeltaIteratorMerger { iters }))
    }
}

impl DeltaIterator for DeltaIteratorMerger {
    fn init(&mut self) -> Result<()> {
        for iter in &mut self.iters {
            iter.init()?;
        }
        Ok(())
    }

    fn seek_to_ordinal(&mut self, row_idx: RowId) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek_to_ordinal(row_idx)?;
        }
        Ok(())
    }

    fn prepare_batch(&mut self, nrows: usize) -> Result<()> {
        for iter in &mut self.iters {
            iter.prepare_batch(nrows)?;
        }
        Ok(())
    }

    fn apply_updates(&mut self, col_idx: usize, dst: &mut ColumnBlock) -> Result<()> {
        for iter in &mut self.iters {
            iter.apply_updates(col_idx, dst)?;
        }
        Ok(())
    }

    fn apply_deletes(&mut self, sel: &mut SelectionVector) -> Result<()> {
        for iter in &mut self.iters {
            iter.apply_deletes(sel)?;
        }
        Ok(())
    }

    /// Mutations are appended per store, in store order; they are not
    /// re-sorted by transaction id across stores.
    fn collect_mutations(&mut self, dst: &mut Vec<Mutation>) -> Result<()> {
        for iter in &mut self.iters {
            iter.collect_mutations(dst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::schema::{ColumnDef, ColumnType};
    use crate::storage::delta::memstore::DeltaMemStore;
    use crate::storage::delta::mutation::RowChangeList;

    fn test_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("a", ColumnType::Int64),
            ColumnDef::new("b", ColumnType::Int64),
        ])
    }

    fn iter_over(muts: Vec<Mutation>, snapshot: MvccSnapshot) -> SortedDeltaIterator {
        SortedDeltaIterator::new(Arc::new(muts), test_schema(), snapshot)
    }

    #[test]
    fn test_apply_updates_in_window() {
        let muts = vec![
            Mutation::new(0, 1, RowChangeList::update_one(0, Value::Int64(100))),
            Mutation::new(2, 1, RowChangeList::update_one(0, Value::Int64(102))),
            Mutation::new(2, 2, RowChangeList::update_one(1, Value::Int64(202))),
            Mutation::new(7, 1, RowChangeList::update_one(0, Value::Int64(107))),
        ];
        let mut iter = iter_over(muts, MvccSnapshot::all_visible());
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(4).unwrap();

        let mut col0 = ColumnBlock::new(ColumnType::Int64, 4);
        iter.apply_updates(0, &mut col0).unwrap();
        assert_eq!(col0.get(0), &Value::Int64(100));
        assert!(col0.get(1).is_null());
        assert_eq!(col0.get(2), &Value::Int64(102));
        // Row 7 is outside the window
        assert!(col0.get(3).is_null());

        let mut col1 = ColumnBlock::new(ColumnType::Int64, 4);
        iter.apply_updates(1, &mut col1).unwrap();
        assert_eq!(col1.get(2), &Value::Int64(202));

        // Next batch picks up where the last one ended
        iter.prepare_batch(4).unwrap();
        let mut col0 = ColumnBlock::new(ColumnType::Int64, 4);
        iter.apply_updates(0, &mut col0).unwrap();
        assert_eq!(col0.get(3), &Value::Int64(107)); // row 7 at offset 3 of [4, 8)
    }

    #[test]
    fn test_snapshot_filters_updates_and_deletes() {
        let muts = vec![
            Mutation::new(3, 1, RowChangeList::update_one(0, Value::Int64(5))),
            Mutation::new(3, 2, RowChangeList::Delete),
        ];

        // Snapshot sees both: row deleted.
        let mut iter = iter_over(muts.clone(), MvccSnapshot::at(2));
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(8).unwrap();
        let mut sel = SelectionVector::all_selected(8);
        iter.apply_deletes(&mut sel).unwrap();
        assert!(!sel.is_selected(3));

        // Snapshot sees only txn 1: row present, update applied.
        let mut iter = iter_over(muts, MvccSnapshot::at(1));
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(8).unwrap();
        let mut sel = SelectionVector::all_selected(8);
        iter.apply_deletes(&mut sel).unwrap();
        assert!(sel.is_selected(3));

        let mut col = ColumnBlock::new(ColumnType::Int64, 8);
        iter.apply_updates(0, &mut col).unwrap();
        assert_eq!(col.get(3), &Value::Int64(5));
    }

    #[test]
    fn test_merger_later_store_wins() {
        let schema = test_schema();
        let snap = MvccSnapshot::all_visible();

        let s0 = Arc::new(DeltaMemStore::new());
        s0.update(1, 7, RowChangeList::update_one(1, Value::Int64(1)));
        let s1 = Arc::new(DeltaMemStore::new());
        s1.update(2, 7, RowChangeList::update_one(1, Value::Int64(2)));
        let s2 = Arc::new(DeltaMemStore::new());
        s2.update(3, 7, RowChangeList::update_one(1, Value::Int64(3)));

        let stores: Vec<Arc<dyn DeltaStore>> = vec![s0, s1, s2];
        let mut iter = DeltaIteratorMerger::create(&stores, &schema, &snap).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(10).unwrap();

        let mut col = ColumnBlock::new(ColumnType::Int64, 10);
        iter.apply_updates(1, &mut col).unwrap();
        assert_eq!(col.get(7), &Value::Int64(3));
    }

    #[test]
    fn test_merger_deletes_are_monotonic_across_stores() {
        let schema = test_schema();
        let snap = MvccSnapshot::all_visible();

        let s0 = Arc::new(DeltaMemStore::new());
        s0.update(1, 2, RowChangeList::Delete);
        let s1 = Arc::new(DeltaMemStore::new());
        s1.update(2, 2, RowChangeList::update_one(0, Value::Int64(9)));

        let stores: Vec<Arc<dyn DeltaStore>> = vec![s0, s1];
        let mut iter = DeltaIteratorMerger::create(&stores, &schema, &snap).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(4).unwrap();

        let mut sel = SelectionVector::all_selected(4);
        iter.apply_deletes(&mut sel).unwrap();
        // The later update does not resurrect the deleted row.
        assert!(!sel.is_selected(2));
    }

    #[test]
    fn test_merger_collects_in_store_order() {
        let schema = test_schema();
        let snap = MvccSnapshot::all_visible();

        let s0 = Arc::new(DeltaMemStore::new());
        s0.update(5, 1, RowChangeList::update_one(0, Value::Int64(1)));
        let s1 = Arc::new(DeltaMemStore::new());
        s1.update(2, 1, RowChangeList::update_one(0, Value::Int64(2)));

        let stores: Vec<Arc<dyn DeltaStore>> = vec![s0, s1];
        let mut iter = DeltaIteratorMerger::create(&stores, &schema, &snap).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(4).unwrap();

        let mut out = Vec::new();
        iter.collect_mutations(&mut out).unwrap();
        // Store order, not txn order: txn 5 (store 0) precedes txn 2 (store 1).
        let txns: Vec<u64> = out.iter().map(|m| m.txn_id).collect();
        assert_eq!(txns, vec![5, 2]);
    }

    #[test]
    fn test_single_store_passthrough() {
        let schema = test_schema();
        let snap = MvccSnapshot::all_visible();

        let s0 = Arc::new(DeltaMemStore::new());
        s0.update(1, 0, RowChangeList::update_one(0, Value::Int64(42)));

        let stores: Vec<Arc<dyn DeltaStore>> = vec![s0];
        let mut iter = DeltaIteratorMerger::create(&stores, &schema, &snap).unwrap();
        iter.init().unwrap();
        iter.seek_to_ordinal(0).unwrap();
        iter.prepare_batch(1).unwrap();

        let mut col = ColumnBlock::new(ColumnType::Int64, 1);
        iter.apply_updates(0, &mut col).unwrap();
        assert_eq!(col.get(0), &Value::Int64(42));
    }
}
