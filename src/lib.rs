// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! mvtable: transactional row storage over a multi-version ordered map
//!
//! The crate is layered bottom-up:
//!
//! - [`storage`]: values, version chains, the shared ordered maps and the
//!   RocksDB backend committed changes are written to.
//! - [`txn`]: transactions with snapshot reads, row-level write locks with
//!   bounded waits and deadlock detection, savepoints and rollback.
//! - [`index`]: the primary index holding a table's rows and the delegate
//!   index answering primary key lookups through it.
//! - [`table`]: tables and the per-transaction handle used to read and
//!   modify them.

pub mod config;
pub mod index;
pub mod storage;
pub mod table;
pub mod txn;

pub use config::StoreConfig;
pub use index::{Column, Cursor, DelegateIndex, Index, IndexError, PrimaryIndex, Row};
pub use storage::{GcStats, StorageError, Value, VersionedValue};
pub use table::{Database, Table, TableHandle, TableSchema};
pub use txn::{
    IsolationLevel, Transaction, TransactionMap, TransactionStore, TxnError, TxnId, TxnState,
};
