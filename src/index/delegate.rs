// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Index on an integer primary key column, answered by the primary index.

use std::sync::Arc;

use tracing::debug;

use crate::txn::Transaction;

use super::{cost_range_index, Column, Cursor, Index, IndexError, PrimaryIndex, Row};

/// Index on the column that supplies the table's row ids.
///
/// Owns no storage: since the column value *is* the row id, every lookup is
/// a row id lookup on the primary index, and row changes need no upkeep.
pub struct DelegateIndex {
    id: u32,
    name: String,
    primary: Arc<PrimaryIndex>,
    column: Column,
}

impl DelegateIndex {
    /// Creates a delegate for the primary index's main index column.
    pub fn new(id: u32, name: impl Into<String>, primary: Arc<PrimaryIndex>) -> Result<Self, IndexError> {
        let name = name.into();
        let column = primary
            .main_index_column()
            .and_then(|c| primary.columns().get(c))
            .cloned()
            .ok_or_else(|| {
                IndexError::Internal(format!("{name}: primary index has no main index column"))
            })?;

        Ok(Self {
            id,
            name,
            primary,
            column,
        })
    }

    /// Returns the index id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the indexed column.
    #[inline]
    pub fn column(&self) -> &Column {
        &self.column
    }

    /// Returns the primary index lookups are delegated to.
    #[inline]
    pub fn primary(&self) -> &Arc<PrimaryIndex> {
        &self.primary
    }

    /// Drops the index. The primary index goes back to surrogate row ids.
    pub fn drop_index(&self) {
        self.primary.set_main_index_column(None);
        debug!(index = %self.name, "dropped delegate index");
    }
}

impl Index for DelegateIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_name(&self) -> &str {
        self.primary.table_name()
    }

    fn add(&self, _txn: &Transaction, _row: &mut Row) -> Result<(), IndexError> {
        Ok(())
    }

    fn remove(&self, _txn: &Transaction, _row: &Row) -> Result<(), IndexError> {
        Ok(())
    }

    fn update(&self, _txn: &Transaction, _old: &Row, _new: &mut Row) -> Result<(), IndexError> {
        Ok(())
    }

    fn find(
        &self,
        txn: &Transaction,
        first: Option<&Row>,
        last: Option<&Row>,
    ) -> Result<Cursor, IndexError> {
        let min = self.primary.key_from_row(first, i64::MIN, i64::MIN)?;
        // The column is never NULL, so a NULL upper bound matches at most the
        // smallest row rather than every row.
        let max = self.primary.key_from_row(last, i64::MAX, i64::MIN)?;
        Ok(self.primary.find_range(txn, min, max))
    }

    fn find_first_or_last(&self, txn: &Transaction, first: bool) -> Result<Cursor, IndexError> {
        self.primary.find_first_or_last(txn, first)
    }

    fn get_row(&self, txn: &Transaction, key: i64) -> Result<Row, IndexError> {
        self.primary.get_row(txn, key)
    }

    fn row_count(&self, txn: &Transaction) -> Result<u64, IndexError> {
        self.primary.row_count(txn)
    }

    fn row_count_approximation(&self) -> u64 {
        self.primary.row_count_approximation()
    }

    fn cost(&self, masks: Option<&[u32]>) -> f64 {
        10.0 * cost_range_index(
            masks,
            self.primary.row_count_approximation(),
            std::slice::from_ref(&self.column),
            true,
        )
    }

    fn column_index(&self, column: usize) -> Option<usize> {
        (column == self.column.id).then_some(0)
    }

    fn is_row_id_index(&self) -> bool {
        true
    }

    fn can_get_first_or_last(&self) -> bool {
        true
    }

    fn truncate(&self, _txn: &Transaction) -> Result<(), IndexError> {
        Ok(())
    }
}
