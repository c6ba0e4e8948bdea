//! Mutation records: encoded row changes tagged with their transaction

use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::storage::mvcc::TxnId;

/// Ordinal row index within a rowset
pub type RowId = u64;

/// A single column assignment within an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnUpdate {
    /// Index of the column in the table schema
    pub col_idx: usize,
    /// New value for the cell
    pub value: Value,
}

/// Encoded change for one row: column updates or a row deletion
///
/// An update never carries a delete and vice versa. A delete supersedes the
/// visibility of prior updates for the row but does not remove them from the
/// stores that already recorded them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowChangeList {
    Update(Vec<ColumnUpdate>),
    Delete,
}

impl RowChangeList {
    /// Build an update changing a single column
    pub fn update_one(col_idx: usize, value: Value) -> Self {
        RowChangeList::Update(vec![ColumnUpdate { col_idx, value }])
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RowChangeList::Delete)
    }

    /// Column updates carried by this change (empty for deletes)
    pub fn updates(&self) -> &[ColumnUpdate] {
        match self {
            RowChangeList::Update(ups) => ups,
            RowChangeList::Delete => &[],
        }
    }
}

/// A recorded mutation: which row, which transaction, what changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub row_idx: RowId,
    pub txn_id: TxnId,
    pub change: RowChangeList,
}

impl Mutation {
    pub fn new(row_idx: RowId, txn_id: TxnId, change: RowChangeList) -> Self {
        Self {
            row_idx,
            txn_id,
            change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kinds() {
        let up = RowChangeList::update_one(2, Value::Int64(7));
        assert!(!up.is_delete());
        assert_eq!(up.updates().len(), 1);
        assert_eq!(up.updates()[0].col_idx, 2);

        let del = RowChangeList::Delete;
        assert!(del.is_delete());
        assert!(del.updates().is_empty());
    }

    #[test]
    fn test_mutation_serde_roundtrip() {
        let m = Mutation::new(
            9,
            3,
            RowChangeList::Update(vec![
                ColumnUpdate {
                    col_idx: 0,
                    value: Value::String("x".into()),
                },
                ColumnUpdate {
                    col_idx: 1,
                    value: Value::Null,
                },
            ]),
        );
        let bytes = bincode::serialize(&m).unwrap();
        let back: Mutation = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, m);
    }
}
