//! MVCC (Multi-Version Concurrency Control) subsystem
//!
//! Readers carry a snapshot that decides which transactions' effects they
//! observe; writers tag every mutation with the transaction id that produced
//! it. Nothing at this layer blocks: visibility is a pure predicate applied
//! while iterating deltas.

pub mod snapshot;

pub use snapshot::{next_txn_id, MvccSnapshot, TxnId};
