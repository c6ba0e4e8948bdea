//! Table schema: column definitions and projections

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Result, StrataError};

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int64,
    UInt64,
    Float64,
    String,
    Binary,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub dtype: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, dtype: ColumnType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Schema: an ordered list of column definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    name_to_idx: HashMap<String, usize>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let name_to_idx = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            columns,
            name_to_idx,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &ColumnDef {
        &self.columns[idx]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn get_index(&self, name: &str) -> Option<usize> {
        self.name_to_idx.get(name).copied()
    }

    /// Look up a column index by name, erroring if absent
    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.get_index(name)
            .ok_or_else(|| StrataError::ColumnNotFound(name.to_string()))
    }
}
