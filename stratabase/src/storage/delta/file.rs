//! Delta file writer/reader - immutable on-disk mutation batches
//!
//! File format:
//! ```text
//! +----------------+----------------+----------------+
//! | Header (32B)   | Record 1       | Record 2 ...   |
//! +----------------+----------------+----------------+
//!
//! Header:
//! - magic: 4 bytes "SDLT"
//! - version: 2 bytes
//! - mutation_count: 8 bytes
//! - checksum: 4 bytes (crc32 of the preceding 14 bytes)
//! - reserved: 14 bytes
//!
//! Record:
//! - payload_len: 4 bytes
//! - payload: variable (bincode serialized Mutation)
//! - crc32: 4 bytes
//! ```
//!
//! Records are written in (row_idx, txn_id) ascending order. The reader
//! decodes them all at open; it also exposes raw byte-range reads over the
//! mapped file for consumers that want chunks rather than rows.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use super::iterator::{DeltaIterator, SortedDeltaIterator};
use super::mutation::{Mutation, RowId};
use super::DeltaStore;
use crate::schema::Schema;
use crate::storage::mvcc::{MvccSnapshot, TxnId};
use crate::{Result, StrataError};

/// Delta file magic bytes
const DELTA_MAGIC: &[u8; 4] = b"SDLT";
/// Delta file format version
const DELTA_VERSION: u16 = 1;
/// Delta file header size
const DELTA_HEADER_SIZE: usize = 32;
/// Buffer size for writes
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Delta file header
#[derive(Debug, Clone)]
struct DeltaFileHeader {
    version: u16,
    mutation_count: u64,
}

impl DeltaFileHeader {
    fn new() -> Self {
        Self {
            version: DELTA_VERSION,
            mutation_count: 0,
        }
    }

    fn to_bytes(&self) -> [u8; DELTA_HEADER_SIZE] {
        let mut buf = [0u8; DELTA_HEADER_SIZE];
        buf[0..4].copy_from_slice(DELTA_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.mutation_count.to_le_bytes());

        let checksum = crc32fast::hash(&buf[0..14]);
        buf[14..18].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < DELTA_HEADER_SIZE {
            return Err(StrataError::Corruption(format!(
                "delta file too short for header: {}",
                path.display()
            )));
        }

        if &bytes[0..4] != DELTA_MAGIC {
            return Err(StrataError::Corruption(format!(
                "bad delta file magic: {}",
                path.display()
            )));
        }

        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != DELTA_VERSION {
            return Err(StrataError::Corruption(format!(
                "unsupported delta file version {} in {}",
                version,
                path.display()
            )));
        }

        let mutation_count = u64::from_le_bytes(bytes[6..14].try_into().unwrap());
        let checksum = u32::from_le_bytes(bytes[14..18].try_into().unwrap());
        if crc32fast::hash(&bytes[0..14]) != checksum {
            return Err(StrataError::ChecksumMismatch(format!(
                "delta file header: {}",
                path.display()
            )));
        }

        Ok(Self {
            version,
            mutation_count,
        })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Bracketed writer for a delta file: `create` → `start` → `append`* → `finish`
pub struct DeltaFileWriter {
    path: PathBuf,
    file: BufWriter<File>,
    header: DeltaFileHeader,
    started: bool,
    finished: bool,
    last_key: Option<(RowId, TxnId)>,
}

impl DeltaFileWriter {
    /// Open `path` for writing, truncating any existing file
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            header: DeltaFileHeader::new(),
            started: false,
            finished: false,
            last_key: None,
        })
    }

    /// Begin the write session (writes a placeholder header)
    pub fn start(&mut self) -> Result<()> {
        debug_assert!(!self.started, "writer already started");
        self.file.write_all(&self.header.to_bytes())?;
        self.started = true;
        Ok(())
    }

    /// Append one mutation. Callers must append in (row, txn) ascending order.
    pub fn append(&mut self, mutation: &Mutation) -> Result<()> {
        debug_assert!(self.started && !self.finished, "writer not in session");

        let key = (mutation.row_idx, mutation.txn_id);
        if let Some(last) = self.last_key {
            debug_assert!(key >= last, "mutations appended out of order");
        }
        self.last_key = Some(key);

        let payload = bincode::serialize(mutation)
            .map_err(|e| StrataError::Serialization(e.to_string()))?;
        let crc = crc32fast::hash(&payload);

        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.file.write_all(&crc.to_le_bytes())?;

        self.header.mutation_count += 1;
        Ok(())
    }

    /// Complete the session: rewrite the header with the final count and sync
    pub fn finish(&mut self) -> Result<()> {
        debug_assert!(self.started && !self.finished, "writer not in session");

        self.file.flush()?;
        let inner = self.file.get_mut();
        inner.seek(SeekFrom::Start(0))?;
        inner.write_all(&self.header.to_bytes())?;
        inner.flush()?;
        inner.sync_all()?;

        self.finished = true;
        log::debug!(
            "finished delta file {} ({} mutations)",
            self.path.display(),
            self.header.mutation_count
        );
        Ok(())
    }

    /// Mutations appended so far
    pub fn count(&self) -> u64 {
        self.header.mutation_count
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Immutable reader over a finished delta file
///
/// All records are decoded and validated at open; iteration shares the
/// decoded batch. `size`/`read_fully` expose the raw bytes for byte-range
/// consumers (e.g. data transfer) that bypass row semantics.
#[derive(Debug)]
pub struct DeltaFileReader {
    path: PathBuf,
    mmap: Mmap,
    mutations: Arc<Vec<Mutation>>,
}

impl DeltaFileReader {
    /// Open and validate a delta file
    pub fn open(path: &Path, schema: &Schema) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::NotFound(format!("delta file: {}", path.display()))
            } else {
                StrataError::Io(e)
            }
        })?;

        let len = file.metadata()?.len();
        if len == 0 {
            return Err(StrataError::Corruption(format!(
                "zero-length delta file: {}",
                path.display()
            )));
        }

        // The file is immutable once finished; the map stays valid for the
        // reader's lifetime.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = DeltaFileHeader::from_bytes(&mmap, path)?;
        let mutations = Self::decode_records(&mmap, &header, schema, path)?;

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            mutations: Arc::new(mutations),
        })
    }

    fn decode_records(
        bytes: &[u8],
        header: &DeltaFileHeader,
        schema: &Schema,
        path: &Path,
    ) -> Result<Vec<Mutation>> {
        let mut mutations: Vec<Mutation> = Vec::with_capacity(header.mutation_count as usize);
        let mut pos = DELTA_HEADER_SIZE;

        for _ in 0..header.mutation_count {
            if pos + 4 > bytes.len() {
                return Err(StrataError::Corruption(format!(
                    "truncated record length at offset {} in {}",
                    pos,
                    path.display()
                )));
            }
            let payload_len =
                u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;

            if pos + payload_len + 4 > bytes.len() {
                return Err(StrataError::Corruption(format!(
                    "truncated record payload at offset {} in {}",
                    pos,
                    path.display()
                )));
            }
            let payload = &bytes[pos..pos + payload_len];
            pos += payload_len;
            let crc = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;

            if crc32fast::hash(payload) != crc {
                return Err(StrataError::ChecksumMismatch(format!(
                    "delta record: {}",
                    path.display()
                )));
            }

            let mutation: Mutation = bincode::deserialize(payload)
                .map_err(|e| StrataError::Corruption(format!("bad delta record: {}", e)))?;

            for update in mutation.change.updates() {
                if update.col_idx >= schema.column_count() {
                    return Err(StrataError::Corruption(format!(
                        "delta record references column {} outside schema ({} columns): {}",
                        update.col_idx,
                        schema.column_count(),
                        path.display()
                    )));
                }
            }

            if let Some(last) = mutations.last() {
                if (mutation.row_idx, mutation.txn_id) < (last.row_idx, last.txn_id) {
                    return Err(StrataError::Corruption(format!(
                        "delta records out of order in {}",
                        path.display()
                    )));
                }
            }

            mutations.push(mutation);
        }

        if pos != bytes.len() {
            return Err(StrataError::Corruption(format!(
                "{} trailing bytes after last record in {}",
                bytes.len() - pos,
                path.display()
            )));
        }

        Ok(mutations)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file size in bytes
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Read an arbitrary byte range `[offset, offset + len)`
    pub fn read_fully(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| StrataError::Io(std::io::Error::other("byte range overflow")))?;
        if end > self.size() {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read of [{}, {}) beyond file size {} in {}",
                    offset,
                    end,
                    self.size(),
                    self.path.display()
                ),
            )));
        }
        Ok(self.mmap[offset as usize..end as usize].to_vec())
    }

    /// Decoded mutations, in (row, txn) order
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }
}

impl DeltaStore for DeltaFileReader {
    fn new_delta_iterator(
        &self,
        projection: &Schema,
        snapshot: &MvccSnapshot,
    ) -> Result<Box<dyn DeltaIterator>> {
        Ok(Box::new(SortedDeltaIterator::new(
            Arc::clone(&self.mutations),
            projection.clone(),
            snapshot.clone(),
        )))
    }

    fn is_row_deleted(&self, row_idx: RowId) -> Result<bool> {
        // Records are sorted by row; narrow to this row's span first.
        let start = self.mutations.partition_point(|m| m.row_idx < row_idx);
        Ok(self.mutations[start..]
            .iter()
            .take_while(|m| m.row_idx == row_idx)
            .any(|m| m.change.is_delete()))
    }

    fn name(&self) -> String {
        format!("DeltaFile({})", self.path.display())
    }
}
