//! DeltaApplier - merges base column data with delta iterators during reads
//!
//! Read path per batch:
//! 1. Read base ColumnBlocks from the column source
//! 2. Overlay updated cells per column (latest store wins)
//! 3. Apply deletes into the batch's selection vector
//! 4. Optionally materialize the selected rows as an Arrow RecordBatch

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    UInt64Builder,
};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;

use super::iterator::DeltaIterator;
use super::mutation::{Mutation, RowId};
use crate::data::{ColumnBlock, SelectionVector, Value};
use crate::schema::{ColumnType, Schema};
use crate::{Result, StrataError};

/// Base columnar data for one rowset, read a block at a time
///
/// Implemented by the base storage layer; the delta subsystem only consumes
/// it. `MemoryColumnSource` is the in-memory implementation used by tests.
pub trait ColumnSource: Send {
    fn schema(&self) -> &Schema;

    fn num_rows(&self) -> u64;

    /// Read `nrows` values of column `col_idx` starting at row `start`
    fn read_block(&self, col_idx: usize, start: RowId, nrows: usize) -> Result<ColumnBlock>;
}

/// In-memory column source over fully materialized columns
pub struct MemoryColumnSource {
    schema: Schema,
    columns: Vec<Vec<Value>>,
    num_rows: u64,
}

impl MemoryColumnSource {
    pub fn new(schema: Schema, columns: Vec<Vec<Value>>) -> Result<Self> {
        if columns.len() != schema.column_count() {
            return Err(StrataError::InvariantViolation(format!(
                "{} columns supplied for a schema of {}",
                columns.len(),
                schema.column_count()
            )));
        }
        let num_rows = columns.first().map_or(0, |c| c.len()) as u64;
        if columns.iter().any(|c| c.len() as u64 != num_rows) {
            return Err(StrataError::InvariantViolation(
                "columns differ in length".to_string(),
            ));
        }
        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }
}

impl ColumnSource for MemoryColumnSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn read_block(&self, col_idx: usize, start: RowId, nrows: usize) -> Result<ColumnBlock> {
        let start = start as usize;
        let end = start + nrows;
        let col = &self.columns[col_idx];
        if end > col.len() {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("block [{}, {}) beyond {} rows", start, end, col.len()),
            )));
        }
        Ok(ColumnBlock::from_values(
            self.schema.column(col_idx).dtype,
            col[start..end].to_vec(),
        ))
    }
}

/// One merged batch of rows: patched columns plus the surviving selection
#[derive(Debug)]
pub struct MergedBatch {
    /// Ordinal of the batch's first row within the rowset
    pub start_row: RowId,
    /// One patched block per schema column
    pub columns: Vec<ColumnBlock>,
    /// Rows still visible after deletes
    pub selection: SelectionVector,
}

impl MergedBatch {
    pub fn num_rows(&self) -> usize {
        self.selection.nrows()
    }

    /// Materialize the selected rows as an Arrow RecordBatch
    pub fn to_record_batch(&self, schema: &Schema) -> Result<RecordBatch> {
        let fields: Vec<Field> = schema
            .columns()
            .iter()
            .map(|c| Field::new(c.name.as_str(), arrow_type(c.dtype), true))
            .collect();
        let arrow_schema = Arc::new(ArrowSchema::new(fields));

        let selected: Vec<usize> = (0..self.selection.nrows())
            .filter(|&i| self.selection.is_selected(i))
            .collect();

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        for (col_idx, block) in self.columns.iter().enumerate() {
            arrays.push(build_array(
                schema.column(col_idx).dtype,
                block,
                &selected,
            ));
        }

        RecordBatch::try_new(arrow_schema, arrays)
            .map_err(|e| StrataError::Serialization(e.to_string()))
    }
}

fn arrow_type(dtype: ColumnType) -> ArrowDataType {
    match dtype {
        ColumnType::Bool => ArrowDataType::Boolean,
        ColumnType::Int64 => ArrowDataType::Int64,
        ColumnType::UInt64 => ArrowDataType::UInt64,
        ColumnType::Float64 => ArrowDataType::Float64,
        ColumnType::String => ArrowDataType::Utf8,
        ColumnType::Binary => ArrowDataType::Binary,
    }
}

fn build_array(dtype: ColumnType, block: &ColumnBlock, selected: &[usize]) -> ArrayRef {
    match dtype {
        ColumnType::Bool => {
            let mut builder = BooleanBuilder::with_capacity(selected.len());
            for &i in selected {
                match block.get(i).as_bool() {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Int64 => {
            let mut builder = Int64Builder::with_capacity(selected.len());
            for &i in selected {
                match block.get(i).as_i64() {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::UInt64 => {
            let mut builder = UInt64Builder::with_capacity(selected.len());
            for &i in selected {
                match block.get(i).as_u64() {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Float64 => {
            let mut builder = Float64Builder::with_capacity(selected.len());
            for &i in selected {
                match block.get(i).as_f64() {
                    Some(v) => builder.append_value(v),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::String => {
            let mut builder = StringBuilder::with_capacity(selected.len(), selected.len() * 16);
            for &i in selected {
                match block.get(i).as_str() {
                    Some(s) => builder.append_value(s),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Binary => {
            let mut builder = BinaryBuilder::with_capacity(selected.len(), selected.len() * 16);
            for &i in selected {
                match block.get(i).as_bytes() {
                    Some(b) => builder.append_value(b),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

/// Per-batch pipeline combining a base column source with merged deltas
pub struct DeltaApplier<S: ColumnSource> {
    base: S,
    deltas: Box<dyn DeltaIterator>,
    cur_row: RowId,
}

impl<S: ColumnSource> DeltaApplier<S> {
    pub fn new(base: S, deltas: Box<dyn DeltaIterator>) -> Self {
        Self {
            base,
            deltas,
            cur_row: 0,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        self.deltas.init()?;
        self.deltas.seek_to_ordinal(0)?;
        self.cur_row = 0;
        Ok(())
    }

    pub fn seek_to_ordinal(&mut self, row_idx: RowId) -> Result<()> {
        self.deltas.seek_to_ordinal(row_idx)?;
        self.cur_row = row_idx;
        Ok(())
    }

    /// Whether every row has been produced
    pub fn done(&self) -> bool {
        self.cur_row >= self.base.num_rows()
    }

    pub fn base(&self) -> &S {
        &self.base
    }

    /// Produce the next batch of up to `nrows` merged rows
    pub fn next_batch(&mut self, nrows: usize) -> Result<MergedBatch> {
        let remaining = self.base.num_rows().saturating_sub(self.cur_row) as usize;
        let nrows = nrows.min(remaining);

        self.deltas.prepare_batch(nrows)?;

        let ncols = self.base.schema().column_count();
        let mut columns = Vec::with_capacity(ncols);
        for col_idx in 0..ncols {
            let mut block = self.base.read_block(col_idx, self.cur_row, nrows)?;
            self.deltas.apply_updates(col_idx, &mut block)?;
            columns.push(block);
        }

        let mut selection = SelectionVector::all_selected(nrows);
        self.deltas.apply_deletes(&mut selection)?;

        let batch = MergedBatch {
            start_row: self.cur_row,
            columns,
            selection,
        };
        self.cur_row += nrows as RowId;
        Ok(batch)
    }

    /// Append the current batch's raw mutation history to `dst`
    pub fn collect_mutations(&mut self, dst: &mut Vec<Mutation>) -> Result<()> {
        self.deltas.collect_mutations(dst)
    }
}
