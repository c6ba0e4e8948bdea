//! StrataBase Core Storage Engine
//!
//! Columnar tabular storage core: immutable base column data with a
//! row-level mutation overlay reconciled at read time under snapshot
//! isolation. The delta subsystem tracks updates and deletes per rowset
//! and merges them onto base data during scans.

pub mod data;
pub mod schema;
pub mod storage;

// Re-export main types
pub use data::{ColumnBlock, SelectionVector, Value};
pub use schema::{ColumnDef, ColumnType, Schema};
pub use storage::delta::{
    ColumnSource, ColumnUpdate, DeltaApplier, DeltaFileReader, DeltaFileWriter, DeltaIterator,
    DeltaMemStore, DeltaStore, DeltaTracker, MemoryColumnSource, MergedBatch, Mutation,
    RowChangeList, RowId,
};
pub use storage::mvcc::{next_txn_id, MvccSnapshot, TxnId};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("checksum mismatch in {0}")]
    ChecksumMismatch(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
