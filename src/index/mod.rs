// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Table indices over transactional maps.
//!
//! A table's rows live in its [`PrimaryIndex`]: one transactional map keyed
//! by row id, named `table.<id>`, whose values are the row's columns. When
//! the table's primary key is a single integer column, the row id *is* that
//! column and a [`DelegateIndex`] answers lookups on the column by
//! delegating to the primary index instead of storing anything itself.
//!
//! # Example
//!
//! ```no_run
//! use mvtable::index::{Column, Index, PrimaryIndex, Row};
//! use mvtable::storage::Value;
//! use mvtable::txn::TransactionStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TransactionStore::in_memory();
//! let columns = vec![Column::new(0, "id"), Column::new(1, "name")];
//! let primary = PrimaryIndex::new(&store, 1, "ACCOUNTS", columns, true)?;
//!
//! let txn = store.begin()?;
//! let mut row = Row::new(vec![Value::Long(1), Value::from("alice")]);
//! primary.add(&txn, &mut row)?;
//! txn.commit()?;
//! # Ok(())
//! # }
//! ```

mod cost;
mod cursor;
mod delegate;
mod error;
mod primary;
mod row;

pub use cost::{cost_range_index, IndexCondition, COST_ROW_OFFSET};
pub use cursor::Cursor;
pub use delegate::DelegateIndex;
pub use error::IndexError;
pub use primary::PrimaryIndex;
pub use row::{Column, Row};

use crate::txn::Transaction;

/// Index over a table's rows.
///
/// Every operation takes the transaction it runs in; reads see that
/// transaction's snapshot and own writes.
pub trait Index: Send + Sync {
    /// Returns the name of the index.
    fn name(&self) -> &str;

    /// Returns the name of the table this index belongs to.
    fn table_name(&self) -> &str;

    /// Adds a row, assigning its row id if the index owns row ids.
    fn add(&self, txn: &Transaction, row: &mut Row) -> Result<(), IndexError>;

    /// Removes a row.
    fn remove(&self, txn: &Transaction, row: &Row) -> Result<(), IndexError>;

    /// Replaces `old` with `new`. Both rows have the same row id.
    fn update(&self, txn: &Transaction, old: &Row, new: &mut Row) -> Result<(), IndexError>;

    /// Finds the rows between `first` and `last` (inclusive); `None` leaves
    /// that side open.
    fn find(
        &self,
        txn: &Transaction,
        first: Option<&Row>,
        last: Option<&Row>,
    ) -> Result<Cursor, IndexError>;

    /// Returns a cursor over the first (or last) row, if any.
    fn find_first_or_last(&self, txn: &Transaction, first: bool) -> Result<Cursor, IndexError>;

    /// Returns the row with the given row id.
    fn get_row(&self, txn: &Transaction, key: i64) -> Result<Row, IndexError>;

    /// Exact number of rows visible to `txn`.
    fn row_count(&self, txn: &Transaction) -> Result<u64, IndexError>;

    /// Cheap upper bound of the row count, for planning only.
    fn row_count_approximation(&self) -> u64;

    /// Estimated lookup cost given per-column condition masks.
    fn cost(&self, masks: Option<&[u32]>) -> f64;

    /// Position of `column` within the index, if the index covers it.
    fn column_index(&self, column: usize) -> Option<usize>;

    /// Returns true if `column` is the first column of the index.
    fn is_first_column(&self, column: usize) -> bool {
        self.column_index(column) == Some(0)
    }

    /// Returns true if the index is keyed by row id.
    fn is_row_id_index(&self) -> bool;

    /// Returns true if [`find_first_or_last`](Self::find_first_or_last) is
    /// supported.
    fn can_get_first_or_last(&self) -> bool;

    /// Returns true if the index must be rebuilt after opening.
    fn needs_rebuild(&self) -> bool {
        false
    }

    /// Removes every row within `txn`.
    fn truncate(&self, txn: &Transaction) -> Result<(), IndexError>;
}
