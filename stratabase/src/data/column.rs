//! Column blocks and row selection bitmaps
//!
//! A `ColumnBlock` is a mutable window of one column's values for a batch of
//! consecutive rows. The read path fills it from base storage and the delta
//! iterators overwrite individual slots in place. A `SelectionVector` tracks
//! which rows of the batch remain visible after deletes are applied.

use crate::data::Value;
use crate::schema::ColumnType;

/// A mutable block of values for one column over a row window
#[derive(Debug, Clone)]
pub struct ColumnBlock {
    dtype: ColumnType,
    values: Vec<Value>,
}

impl ColumnBlock {
    /// Create a block of `len` null values
    pub fn new(dtype: ColumnType, len: usize) -> Self {
        Self {
            dtype,
            values: vec![Value::Null; len],
        }
    }

    /// Create a block from existing values
    pub fn from_values(dtype: ColumnType, values: Vec<Value>) -> Self {
        Self { dtype, values }
    }

    pub fn dtype(&self) -> ColumnType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    /// Overwrite the value at `idx`
    pub fn set(&mut self, idx: usize, value: Value) {
        self.values[idx] = value;
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Bitmap of rows selected (visible) within a batch
///
/// Starts with every row selected; applying deletes clears bits. A cleared
/// bit is never re-set by the read path.
#[derive(Debug, Clone)]
pub struct SelectionVector {
    bitmap: Vec<u8>,
    nrows: usize,
}

impl SelectionVector {
    /// Create a selection vector with all `nrows` rows selected
    pub fn all_selected(nrows: usize) -> Self {
        Self {
            bitmap: vec![0xff; nrows.div_ceil(8)],
            nrows,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn is_selected(&self, idx: usize) -> bool {
        debug_assert!(idx < self.nrows);
        (self.bitmap[idx / 8] >> (idx % 8)) & 1 == 1
    }

    /// Deselect a row (mark it deleted for this batch)
    pub fn unset(&mut self, idx: usize) {
        debug_assert!(idx < self.nrows);
        self.bitmap[idx / 8] &= !(1 << (idx % 8));
    }

    /// Number of rows still selected
    pub fn count_selected(&self) -> usize {
        (0..self.nrows).filter(|&i| self.is_selected(i)).count()
    }

    pub fn any_selected(&self) -> bool {
        (0..self.nrows).any(|i| self.is_selected(i))
    }
}
