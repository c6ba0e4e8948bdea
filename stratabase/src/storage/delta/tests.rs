//! Cross-component scenarios for the delta subsystem

use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

use super::applier::MemoryColumnSource;
use super::mutation::RowChangeList;
use super::tracker::DeltaTracker;
use crate::data::{ColumnBlock, SelectionVector, Value};
use crate::schema::{ColumnDef, ColumnType, Schema};
use crate::storage::mvcc::MvccSnapshot;

const NUM_ROWS: u64 = 16;

fn test_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("k", ColumnType::UInt64),
        ColumnDef::new("v", ColumnType::Int64),
    ])
}

fn base_source() -> MemoryColumnSource {
    let ks = (0..NUM_ROWS).map(Value::UInt64).collect();
    let vs = (0..NUM_ROWS as i64).map(|i| Value::Int64(i * 10)).collect();
    MemoryColumnSource::new(test_schema(), vec![ks, vs]).unwrap()
}

fn open_tracker(dir: &std::path::Path) -> DeltaTracker {
    let tracker = DeltaTracker::new(dir, test_schema(), NUM_ROWS);
    tracker.open().unwrap();
    tracker
}

fn full_view(tracker: &DeltaTracker, snap: &MvccSnapshot) -> (ColumnBlock, SelectionVector) {
    let mut iter = tracker.new_delta_iterator(tracker.schema(), snap).unwrap();
    iter.init().unwrap();
    iter.seek_to_ordinal(0).unwrap();
    iter.prepare_batch(NUM_ROWS as usize).unwrap();

    let mut block = ColumnBlock::new(ColumnType::Int64, NUM_ROWS as usize);
    iter.apply_updates(1, &mut block).unwrap();
    let mut sel = SelectionVector::all_selected(NUM_ROWS as usize);
    iter.apply_deletes(&mut sel).unwrap();
    (block, sel)
}

#[test]
fn test_monotonic_visibility_across_nested_snapshots() {
    let dir = tempdir().unwrap();
    let tracker = open_tracker(dir.path());

    tracker.update(1, 2, RowChangeList::update_one(1, Value::Int64(100)));
    tracker.update(2, 5, RowChangeList::Delete);
    tracker.flush().unwrap();
    tracker.update(3, 2, RowChangeList::update_one(1, Value::Int64(200)));
    tracker.update(4, 8, RowChangeList::Delete);

    let s1 = MvccSnapshot::at(2);
    let s2 = MvccSnapshot::at(4);
    assert!(s2.covers(&s1));

    let (b1, sel1) = full_view(&tracker, &s1);
    let (b2, sel2) = full_view(&tracker, &s2);

    // S1's deletes are never lost under S2.
    for i in 0..NUM_ROWS as usize {
        if !sel1.is_selected(i) {
            assert!(!sel2.is_selected(i));
        }
    }
    assert!(!sel1.is_selected(5));
    assert!(!sel2.is_selected(8));
    assert!(sel1.is_selected(8)); // txn 4 invisible to S1

    // S2 sees S1's value superseded by the later committed update.
    assert_eq!(b1.get(2), &Value::Int64(100));
    assert_eq!(b2.get(2), &Value::Int64(200));
}

#[test]
fn test_flush_reopen_equivalence_for_every_snapshot() {
    let dir = tempdir().unwrap();
    let tracker = open_tracker(dir.path());

    tracker.update(1, 0, RowChangeList::update_one(1, Value::Int64(-1)));
    tracker.update(2, 1, RowChangeList::Delete);
    tracker.flush().unwrap();
    tracker.update(3, 0, RowChangeList::update_one(1, Value::Int64(-2)));
    tracker.update(4, 3, RowChangeList::Delete);

    let snapshots: Vec<MvccSnapshot> = (0..=5).map(MvccSnapshot::at).collect();
    let before: Vec<_> = snapshots.iter().map(|s| full_view(&tracker, s)).collect();

    tracker.flush().unwrap();
    drop(tracker);

    let reopened = open_tracker(dir.path());
    assert_eq!(reopened.collect_stores().len(), 3); // 2 files + DMS

    for (snap, (b_before, sel_before)) in snapshots.iter().zip(&before) {
        let (b_after, sel_after) = full_view(&reopened, snap);
        for i in 0..NUM_ROWS as usize {
            assert_eq!(b_before.get(i), b_after.get(i), "snapshot {:?} row {}", snap, i);
            assert_eq!(sel_before.is_selected(i), sel_after.is_selected(i));
        }
    }
}

#[test]
fn test_merged_read_through_applier_latest_store_wins() {
    let dir = tempdir().unwrap();
    let tracker = open_tracker(dir.path());

    // file 0 sets v[7]=1, file 1 sets v[7]=2, DMS sets v[7]=3
    tracker.update(1, 7, RowChangeList::update_one(1, Value::Int64(1)));
    tracker.flush().unwrap();
    tracker.update(2, 7, RowChangeList::update_one(1, Value::Int64(2)));
    tracker.flush().unwrap();
    tracker.update(3, 7, RowChangeList::update_one(1, Value::Int64(3)));

    let mut applier = tracker
        .wrap_iterator(base_source(), &MvccSnapshot::all_visible())
        .unwrap();
    applier.init().unwrap();
    let batch = applier.next_batch(NUM_ROWS as usize).unwrap();
    assert_eq!(batch.columns[1].get(7), &Value::Int64(3));

    // Earlier snapshots peel the layers back off.
    let mut applier = tracker
        .wrap_iterator(base_source(), &MvccSnapshot::at(2))
        .unwrap();
    applier.init().unwrap();
    let batch = applier.next_batch(NUM_ROWS as usize).unwrap();
    assert_eq!(batch.columns[1].get(7), &Value::Int64(2));

    let mut applier = tracker
        .wrap_iterator(base_source(), &MvccSnapshot::none_visible())
        .unwrap();
    applier.init().unwrap();
    let batch = applier.next_batch(NUM_ROWS as usize).unwrap();
    assert_eq!(batch.columns[1].get(7), &Value::Int64(70)); // base value
}

#[test]
fn test_readers_capture_stores_across_flush() {
    let dir = tempdir().unwrap();
    let tracker = Arc::new(open_tracker(dir.path()));
    tracker.update(1, 0, RowChangeList::update_one(1, Value::Int64(42)));

    // A reader that captured the pre-flush store list keeps reading the
    // captured DMS even after the flush replaces it in the tracker's slot.
    let stores = tracker.collect_stores();
    tracker.flush().unwrap();

    let mut iter = super::iterator::DeltaIteratorMerger::create(
        &stores,
        tracker.schema(),
        &MvccSnapshot::all_visible(),
    )
    .unwrap();
    iter.init().unwrap();
    iter.seek_to_ordinal(0).unwrap();
    iter.prepare_batch(NUM_ROWS as usize).unwrap();

    let mut block = ColumnBlock::new(ColumnType::Int64, NUM_ROWS as usize);
    iter.apply_updates(1, &mut block).unwrap();
    assert_eq!(block.get(0), &Value::Int64(42));
}

#[test]
fn test_concurrent_readers_and_writers_with_flushes() {
    let dir = tempdir().unwrap();
    let tracker = Arc::new(open_tracker(dir.path()));

    let writer = {
        let tracker = Arc::clone(&tracker);
        thread::spawn(move || {
            for i in 0..NUM_ROWS {
                tracker.update(i + 1, i, RowChangeList::update_one(1, Value::Int64(i as i64)));
                if i % 4 == 3 {
                    tracker.flush().unwrap();
                }
            }
        })
    };

    let reader = {
        let tracker = Arc::clone(&tracker);
        thread::spawn(move || {
            for _ in 0..200 {
                let (_, sel) = full_view(&tracker, &MvccSnapshot::all_visible());
                // No deletes were written; every row stays selected.
                assert_eq!(sel.count_selected(), NUM_ROWS as usize);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    let (block, _) = full_view(&tracker, &MvccSnapshot::all_visible());
    for i in 0..NUM_ROWS as usize {
        assert_eq!(block.get(i), &Value::Int64(i as i64));
    }
}
