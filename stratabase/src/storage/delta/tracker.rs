//! DeltaTracker - store lifecycle orchestration for one rowset
//!
//! Owns the ordered list of delta stores (oldest to newest) plus the active
//! DeltaMemStore, routes writes into the DMS, composes merged iterators for
//! reads, and drives the flush protocol that swaps the DMS for a durable
//! delta file.
//!
//! Locking: `components` is guarded by a reader/writer lock. Updates, reads
//! and store-list snapshots hold it shared; only the flush swap and commit
//! phases take it exclusively, and neither performs I/O while holding it. A
//! reader therefore always observes a fully pre-swap or fully post-swap
//! store list, never a torn one.
//!
//! Concurrent flushes are not supported; callers must serialize `flush`
//! invocations externally. The commit phase verifies this and reports an
//! invariant violation if the parked store was displaced.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::applier::{ColumnSource, DeltaApplier};
use super::file::{DeltaFileReader, DeltaFileWriter};
use super::iterator::{DeltaIterator, DeltaIteratorMerger};
use super::memstore::DeltaMemStore;
use super::mutation::{RowChangeList, RowId};
use super::DeltaStore;
use crate::schema::Schema;
use crate::storage::mvcc::{MvccSnapshot, TxnId};
use crate::{Result, StrataError};

/// File name prefix for flushed delta files: `delta_<N>`
pub const DELTA_FILE_PREFIX: &str = "delta_";
/// File name prefix for base column data, owned by the base storage layer
pub const COLUMN_FILE_PREFIX: &str = "col_";

/// Store list state guarded by the component lock
struct Components {
    /// Persisted stores plus any parked DMS mid-flush, oldest to newest
    stores: Vec<Arc<dyn DeltaStore>>,
    /// Active mutable store receiving new updates
    dms: Arc<DeltaMemStore>,
}

/// Orchestrator for one rowset's delta stores
pub struct DeltaTracker {
    dir: PathBuf,
    schema: Schema,
    num_rows: u64,
    open: AtomicBool,
    /// Next delta file sequence index; `max(existing) + 1` after `open`
    next_delta_idx: AtomicU64,
    components: RwLock<Components>,
}

impl DeltaTracker {
    pub fn new(dir: impl Into<PathBuf>, schema: Schema, num_rows: u64) -> Self {
        Self {
            dir: dir.into(),
            schema,
            num_rows,
            open: AtomicBool::new(false),
            next_delta_idx: AtomicU64::new(0),
            components: RwLock::new(Components {
                stores: Vec::new(),
                dms: Arc::new(DeltaMemStore::new()),
            }),
        }
    }

    /// Path of the delta file with sequence index `idx` under `dir`
    pub fn delta_path(dir: &Path, idx: u64) -> PathBuf {
        dir.join(format!("{}{}", DELTA_FILE_PREFIX, idx))
    }

    /// Scan the rowset directory and reconstruct the store list.
    ///
    /// Must be called once, before any readers are built. Any malformed
    /// `delta_<N>` name or unopenable delta file aborts the open; unknown
    /// files are skipped with a warning.
    pub fn open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            return Err(StrataError::InvariantViolation(
                "delta tracker already open".to_string(),
            ));
        }
        if !self.components.read().stores.is_empty() {
            return Err(StrataError::InvariantViolation(
                "store list must be empty before open".to_string(),
            ));
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::NotFound(format!("rowset directory: {}", self.dir.display()))
            } else {
                StrataError::Io(e)
            }
        })?;

        let mut found: Vec<(u64, DeltaFileReader)> = Vec::new();
        let mut next_idx = 0u64;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            // Skip hidden files
            if name.starts_with('.') {
                continue;
            }

            if let Some(suffix) = name.strip_prefix(DELTA_FILE_PREFIX) {
                // The file should be named 'delta_<N>', N being the order in
                // which it was flushed.
                let idx: u64 = suffix.parse().map_err(|_| {
                    StrataError::Corruption(format!("bad delta file name: {}", path.display()))
                })?;

                let reader = DeltaFileReader::open(&path, &self.schema).map_err(|e| {
                    log::error!("failed to open delta file {}: {}", path.display(), e);
                    e
                })?;
                log::info!(
                    "opened delta file {} ({} mutations)",
                    path.display(),
                    reader.mutation_count()
                );

                next_idx = next_idx.max(idx + 1);
                found.push((idx, reader));
            } else if name.starts_with(COLUMN_FILE_PREFIX) {
                // expected: base column data, not ours
            } else {
                log::warn!("ignoring unknown file: {}", path.display());
            }
        }

        // Directory scan order is arbitrary; the store list is ordered by
        // flush sequence.
        found.sort_by_key(|(idx, _)| *idx);

        let mut comps = self.components.write();
        comps
            .stores
            .extend(found.into_iter().map(|(_, r)| Arc::new(r) as Arc<dyn DeltaStore>));

        self.next_delta_idx.store(next_idx, Ordering::Release);
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Next delta file sequence index to be allocated
    pub fn next_delta_index(&self) -> u64 {
        self.next_delta_idx.load(Ordering::Acquire)
    }

    /// Point-in-time copy of the store list with the active DMS appended.
    ///
    /// The returned handles keep their stores alive even if a concurrent
    /// flush later replaces a slot.
    pub fn collect_stores(&self) -> Vec<Arc<dyn DeltaStore>> {
        let comps = self.components.read();
        let mut stores = comps.stores.clone();
        stores.push(Arc::clone(&comps.dms) as Arc<dyn DeltaStore>);
        stores
    }

    /// Build a merged delta iterator over every store, oldest to newest
    pub fn new_delta_iterator(
        &self,
        projection: &Schema,
        snapshot: &MvccSnapshot,
    ) -> Result<Box<dyn DeltaIterator>> {
        let stores = self.collect_stores();
        DeltaIteratorMerger::create(&stores, projection, snapshot)
    }

    /// Wrap a base column source with this tracker's merged deltas
    pub fn wrap_iterator<S: ColumnSource>(
        &self,
        base: S,
        snapshot: &MvccSnapshot,
    ) -> Result<DeltaApplier<S>> {
        let deltas = self.new_delta_iterator(base.schema(), snapshot)?;
        Ok(DeltaApplier::new(base, deltas))
    }

    /// Record a mutation against the active DMS.
    ///
    /// May run concurrently with other updates and with reads. `row_idx`
    /// must be within the rowset (`< num_rows`).
    pub fn update(&self, txn_id: TxnId, row_idx: RowId, change: RowChangeList) {
        let comps = self.components.read();
        debug_assert!(row_idx < self.num_rows, "row index out of bounds");
        comps.dms.update(txn_id, row_idx, change);
    }

    /// Whether any store records a delete for `row_idx`, ignoring snapshots.
    ///
    /// Deletes are monotonic, so store order only affects how fast this
    /// short-circuits; the DMS and newest stores are checked first.
    pub fn is_row_deleted(&self, row_idx: RowId) -> Result<bool> {
        let comps = self.components.read();
        debug_assert!(row_idx < self.num_rows, "row index out of bounds");

        if comps.dms.row_deleted(row_idx) {
            return Ok(true);
        }
        for store in comps.stores.iter().rev() {
            if store.is_row_deleted(row_idx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Serialize `dms` to the next delta file and reopen it for read
    fn flush_dms(&self, dms: &DeltaMemStore) -> Result<DeltaFileReader> {
        let idx = self.next_delta_idx.fetch_add(1, Ordering::SeqCst);
        let path = Self::delta_path(&self.dir, idx);

        let mut writer = DeltaFileWriter::create(&path).map_err(|e| {
            log::warn!(
                "unable to open output file for delta level {} at {}: {}",
                idx,
                path.display(),
                e
            );
            e
        })?;
        writer.start().map_err(|e| {
            log::warn!("unable to start delta file writer for {}: {}", path.display(), e);
            e
        })?;
        dms.flush_to(&mut writer)?;
        writer.finish()?;
        log::info!("flushed delta file: {}", path.display());

        let reader = DeltaFileReader::open(&path, &self.schema)?;
        log::debug!("reopened delta file for read: {}", path.display());
        Ok(reader)
    }

    /// Flush the active DMS to a durable delta file.
    ///
    /// Three phases: swap the DMS out under the exclusive lock, write the
    /// file with no lock held, then commit the reader into the parked slot
    /// under the exclusive lock again. Once the swap has happened there is
    /// no rollback: a durability-phase failure leaves the retired DMS
    /// permanently parked in the store list, and the error is unrecoverable
    /// for this rowset.
    pub fn flush(&self) -> Result<()> {
        // Phase 1: swap. Shuts out concurrent readers and writers only for
        // the duration of the list mutation.
        let (old_dms, slot, count) = {
            let mut comps = self.components.write();

            let count = comps.dms.count();
            if count == 0 {
                // No need to flush if there are no deltas.
                return Ok(());
            }

            let old_dms = Arc::clone(&comps.dms);
            comps.dms = Arc::new(DeltaMemStore::new());
            comps
                .stores
                .push(Arc::clone(&old_dms) as Arc<dyn DeltaStore>);
            (old_dms, comps.stores.len() - 1, count)
        };

        log::info!("flushing {} deltas from {}", count, self.dir.display());

        // Phase 2: durability, no lock held.
        let reader = match self.flush_dms(&old_dms) {
            Ok(reader) => reader,
            Err(e) => {
                log::error!(
                    "failed to flush delta mem store for {}: {}; the retired store \
                     stays in the list with no recovery path",
                    self.dir.display(),
                    e
                );
                return Err(e);
            }
        };

        // Phase 3: commit. Swap the reader into the slot the DMS was parked
        // in, verifying nothing else touched it.
        {
            let mut comps = self.components.write();
            let displaced = comps.stores.len() <= slot
                || Arc::as_ptr(&comps.stores[slot]) as *const ()
                    != Arc::as_ptr(&old_dms) as *const ();
            if displaced {
                return Err(StrataError::InvariantViolation(
                    "delta store list changed during flush; concurrent flushes \
                     are not supported"
                        .to_string(),
                ));
            }
            comps.stores[slot] = Arc::new(reader);
        }

        Ok(())
    }
}
