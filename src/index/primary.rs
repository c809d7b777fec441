// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The primary index: a table's rows keyed by row id.

use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::storage::{Value, VersionedMap};
use crate::txn::{Transaction, TransactionMap, TransactionStore, TxnError};

use super::{cost_range_index, Column, Cursor, Index, IndexError, Row};

/// Row store of a table, keyed by row id.
///
/// Row ids are either surrogate keys handed out from `last_key`, or, once
/// [`set_main_index_column`](Self::set_main_index_column) names an integer
/// column, the value of that column.
pub struct PrimaryIndex {
    id: u32,
    name: String,
    table_name: String,
    map_name: String,
    columns: Vec<Column>,
    store: TransactionStore,
    map: Arc<VersionedMap>,
    last_key: AtomicI64,
    main_index_column: RwLock<Option<usize>>,
}

impl PrimaryIndex {
    /// Opens the primary index of table `id`, creating its map if needed.
    ///
    /// Non-persistent tables use a volatile map whose commits never reach
    /// durable storage.
    pub fn new(
        store: &TransactionStore,
        id: u32,
        table_name: &str,
        columns: Vec<Column>,
        persistent: bool,
    ) -> Result<Self, IndexError> {
        let map_name = format!("table.{id}");
        let txn = store.begin()?;
        let map = txn.open_map(&map_name)?.map().clone();
        map.set_volatile(!persistent);
        txn.commit()?;

        // The raw last key includes keys of uncommitted rows.
        let name = format!("{table_name}_DATA");
        let last_key = match map.last_key() {
            Some(key) => key.to_long().ok_or_else(|| {
                IndexError::Internal(format!("{name}: row id {key} is not an integer"))
            })?,
            None => 0,
        };
        debug!(index = %name, map = %map_name, last_key, "opened primary index");

        Ok(Self {
            id,
            name,
            table_name: table_name.to_string(),
            map_name,
            columns,
            store: store.clone(),
            map,
            last_key: AtomicI64::new(last_key),
            main_index_column: RwLock::new(None),
        })
    }

    /// Returns the index id (the table id).
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the name of the map holding the rows.
    #[inline]
    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    /// Returns the table's columns.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the largest row id handed out or stored so far.
    #[inline]
    pub fn last_key(&self) -> i64 {
        self.last_key.load(Ordering::Acquire)
    }

    /// Returns the column whose value is the row id, if any.
    pub fn main_index_column(&self) -> Option<usize> {
        *self.main_index_column.read()
    }

    /// Makes `column` the source of row ids (`None` for surrogate row ids).
    pub fn set_main_index_column(&self, column: Option<usize>) {
        *self.main_index_column.write() = column;
    }

    fn view(&self, txn: &Transaction) -> TransactionMap {
        txn.view(self.map.clone())
    }

    fn key_description(&self, key: i64) -> String {
        let column = self
            .main_index_column()
            .and_then(|c| self.columns.get(c))
            .map_or("_ROWID_", |c| c.name.as_str());
        format!("PRIMARY KEY ON {}({column}) = {key}", self.table_name)
    }

    /// Converts the main index column of `row` to a row id.
    fn column_key(&self, row: &Row, column: usize) -> Result<i64, IndexError> {
        match row.value(column) {
            None => Err(IndexError::Internal(format!(
                "{}: row has no column {column}",
                self.name
            ))),
            Some(Value::Null) => Err(IndexError::Internal(format!(
                "{}: NULL row id in column {column}",
                self.name
            ))),
            Some(value) => value.to_long().ok_or_else(|| {
                IndexError::Internal(format!("{}: row id {value} is not an integer", self.name))
            }),
        }
    }

    /// Derives the row id bound for a lookup row.
    ///
    /// Returns `if_empty` when there is no row and `if_null` when the main
    /// index column is NULL.
    pub fn key_from_row(
        &self,
        row: Option<&Row>,
        if_empty: i64,
        if_null: i64,
    ) -> Result<i64, IndexError> {
        let Some(row) = row else {
            return Ok(if_empty);
        };
        match self.main_index_column() {
            None => Ok(row.key),
            Some(column) => match row.value(column) {
                Some(Value::Null) => Ok(if_null),
                _ => self.column_key(row, column),
            },
        }
    }

    /// Raises `last_key` to `key` unless it is already larger.
    fn raise_last_key(&self, key: i64) {
        let mut last = self.last_key.load(Ordering::Acquire);
        while key > last {
            match self
                .last_key
                .compare_exchange_weak(last, key, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => last = actual,
            }
        }
    }

    /// Finds the rows with row ids in `min..=max`.
    pub fn find_range(&self, txn: &Transaction, min: i64, max: i64) -> Cursor {
        let entries = self.view(txn).entry_iter(
            Bound::Included(Value::Long(min)),
            Bound::Included(Value::Long(max)),
        );
        Cursor::entries(&self.name, entries)
    }

    /// Locks the row `key` for `txn`, waiting at most `timeout` (the
    /// transaction's lock timeout if `None`). Returns `None` if the row does
    /// not exist.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        key: i64,
        timeout: Option<Duration>,
    ) -> Result<Option<Row>, IndexError> {
        let timeout = timeout.unwrap_or_else(|| txn.lock_timeout());
        match self.view(txn).lock_for(&Value::Long(key), timeout)? {
            Some(stored) => Ok(Some(Row::from_stored(&self.name, key, stored)?)),
            None => Ok(None),
        }
    }

    /// Maximum number of rows, including uncommitted rows of every
    /// transaction.
    pub fn row_count_max(&self) -> u64 {
        self.map.len() as u64
    }

    /// Removes the index's map and its durable contents.
    pub fn drop_storage(&self) -> Result<(), IndexError> {
        if !self.map.is_closed() {
            self.store.remove_map(&self.map_name)?;
            debug!(index = %self.name, map = %self.map_name, "dropped primary index storage");
        }
        Ok(())
    }
}

impl Index for PrimaryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn add(&self, txn: &Transaction, row: &mut Row) -> Result<(), IndexError> {
        match self.main_index_column() {
            None => {
                if row.key == 0 {
                    row.key = self.last_key.fetch_add(1, Ordering::AcqRel) + 1;
                }
            }
            Some(column) => row.key = self.column_key(row, column)?,
        }

        let view = self.view(txn);
        let key = Value::Long(row.key);
        match view.put_if_absent(key.clone(), row.to_value()) {
            Ok(()) => {}
            Err(TxnError::DuplicateKey { .. }) => {
                return Err(IndexError::DuplicateKey {
                    index: self.name.clone(),
                    key: self.key_description(row.key),
                });
            }
            Err(TxnError::WriteConflict { .. }) => {
                // Another transaction owns the key; it is a duplicate only
                // if a committed row sits underneath.
                let committed = view.get_committed(&key)?.is_some();
                let key = self.key_description(row.key);
                let index = self.name.clone();
                return Err(if committed {
                    IndexError::DuplicateKey { index, key }
                } else {
                    IndexError::ConcurrentUpdate { index, key }
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.raise_last_key(row.key);
        Ok(())
    }

    fn remove(&self, txn: &Transaction, row: &Row) -> Result<(), IndexError> {
        match self.view(txn).remove(&Value::Long(row.key))? {
            Some(_) => Ok(()),
            None => Err(IndexError::RowNotFound {
                index: self.name.clone(),
                key: row.key,
            }),
        }
    }

    fn update(&self, txn: &Transaction, old: &Row, new: &mut Row) -> Result<(), IndexError> {
        if let Some(column) = self.main_index_column() {
            new.key = self.column_key(new, column)?;
        }
        let key = old.key;
        if key != new.key {
            return Err(IndexError::Internal(format!(
                "{}: update changes row id {key} to {}",
                self.name, new.key
            )));
        }

        let view = self.view(txn);
        let key_value = Value::Long(key);
        if view.lock(&key_value)?.is_none() {
            return Err(IndexError::RowNotFound {
                index: self.name.clone(),
                key,
            });
        }
        view.put(key_value, new.to_value())?;

        self.raise_last_key(new.key);
        Ok(())
    }

    fn find(
        &self,
        txn: &Transaction,
        first: Option<&Row>,
        last: Option<&Row>,
    ) -> Result<Cursor, IndexError> {
        let min = first.map_or(i64::MIN, |row| row.key);
        let max = last.map_or(i64::MAX, |row| row.key);
        Ok(self.find_range(txn, min, max))
    }

    fn find_first_or_last(&self, txn: &Transaction, first: bool) -> Result<Cursor, IndexError> {
        let view = self.view(txn);
        let key = if first {
            view.first_key()?
        } else {
            view.last_key()?
        };
        let Some(key) = key else {
            return Ok(Cursor::empty(&self.name));
        };

        let row = match key.to_long() {
            Some(key) => self.get_row(txn, key)?,
            None => {
                return Err(IndexError::Internal(format!(
                    "{}: row id {key} is not an integer",
                    self.name
                )))
            }
        };
        Ok(Cursor::single(&self.name, Some(row)))
    }

    fn get_row(&self, txn: &Transaction, key: i64) -> Result<Row, IndexError> {
        match self.view(txn).get(&Value::Long(key))? {
            Some(stored) => Row::from_stored(&self.name, key, stored),
            None => Err(IndexError::RowNotFound {
                index: self.name.clone(),
                key,
            }),
        }
    }

    fn row_count(&self, txn: &Transaction) -> Result<u64, IndexError> {
        Ok(self.view(txn).size()? as u64)
    }

    fn row_count_approximation(&self) -> u64 {
        self.row_count_max()
    }

    fn cost(&self, masks: Option<&[u32]>) -> f64 {
        10.0 * cost_range_index(masks, self.row_count_max(), &self.columns, true)
    }

    fn column_index(&self, _column: usize) -> Option<usize> {
        // Lookups by column go through the delegate index.
        None
    }

    fn is_row_id_index(&self) -> bool {
        true
    }

    fn can_get_first_or_last(&self) -> bool {
        true
    }

    fn truncate(&self, txn: &Transaction) -> Result<(), IndexError> {
        let removed = self.view(txn).clear()?;
        debug!(index = %self.name, txn_id = %txn.id(), removed, "truncated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexCondition;
    use std::collections::HashSet;
    use std::thread;

    fn columns() -> Vec<Column> {
        vec![Column::new(0, "ID"), Column::new(1, "NAME")]
    }

    fn row(id: i64, name: &str) -> Row {
        Row::new(vec![Value::Long(id), Value::from(name)])
    }

    fn keys(cursor: Cursor) -> Vec<i64> {
        cursor.map(|row| row.unwrap().key).collect()
    }

    fn keyed_index(store: &TransactionStore) -> PrimaryIndex {
        let index = PrimaryIndex::new(store, 1, "T", columns(), true).unwrap();
        index.set_main_index_column(Some(0));
        index
    }

    #[test]
    fn test_names() {
        let store = TransactionStore::in_memory();
        let index = PrimaryIndex::new(&store, 42, "ORDERS", columns(), true).unwrap();

        assert_eq!(index.name(), "ORDERS_DATA");
        assert_eq!(index.table_name(), "ORDERS");
        assert_eq!(index.map_name(), "table.42");
        assert!(!index.map.is_volatile());
        assert!(index.is_row_id_index());
        assert!(index.can_get_first_or_last());
        assert!(!index.needs_rebuild());
        assert_eq!(index.column_index(0), None);
        assert!(!index.is_first_column(0));

        let temp = PrimaryIndex::new(&store, 43, "TEMP", columns(), false).unwrap();
        assert!(temp.map.is_volatile());
    }

    #[test]
    fn test_surrogate_keys() {
        let store = TransactionStore::in_memory();
        let index = PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap();
        let txn = store.begin().unwrap();

        let mut a = row(100, "a");
        let mut b = row(200, "b");
        index.add(&txn, &mut a).unwrap();
        index.add(&txn, &mut b).unwrap();
        assert_eq!((a.key, b.key), (1, 2));

        // An explicit row id raises last_key.
        let mut c = Row::with_key(10, vec![Value::Long(0), Value::from("c")]);
        index.add(&txn, &mut c).unwrap();
        assert_eq!(index.last_key(), 10);

        let mut d = row(0, "d");
        index.add(&txn, &mut d).unwrap();
        assert_eq!(d.key, 11);
    }

    #[test]
    fn test_concurrent_surrogate_keys_unique() {
        let store = TransactionStore::in_memory();
        let index = Arc::new(PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                let index = index.clone();
                thread::spawn(move || {
                    let txn = store.begin().unwrap();
                    let mut keys = Vec::new();
                    for i in 0..100 {
                        let mut r = row(0, &format!("{t}-{i}"));
                        index.add(&txn, &mut r).unwrap();
                        keys.push(r.key);
                    }
                    txn.commit().unwrap();
                    keys
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                assert!(all.insert(key), "duplicate key {key}");
            }
        }
        assert_eq!(all.len(), 800);
        assert_eq!(index.last_key(), *all.iter().max().unwrap());
        assert_eq!(index.last_key(), 800);
    }

    #[test]
    fn test_duplicate_after_commit() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);

        let txn = store.begin().unwrap();
        index.add(&txn, &mut row(7, "first")).unwrap();
        txn.commit().unwrap();

        let txn = store.begin().unwrap();
        let err = index.add(&txn, &mut row(7, "second")).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateKey { .. }), "{err}");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("PRIMARY KEY ON T(ID) = 7"));
    }

    #[test]
    fn test_concurrent_insert_same_key() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);

        let a = store.begin().unwrap();
        let b = store.begin().unwrap();
        index.add(&a, &mut row(7, "a")).unwrap();

        let err = index.add(&b, &mut row(7, "b")).unwrap_err();
        assert!(matches!(err, IndexError::ConcurrentUpdate { .. }), "{err}");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_duplicate_of_committed_row_locked_by_other() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);

        let setup = store.begin().unwrap();
        index.add(&setup, &mut row(7, "a")).unwrap();
        setup.commit().unwrap();

        let locker = store.begin().unwrap();
        index.lock_row(&locker, 7, None).unwrap();

        let txn = store.begin().unwrap();
        let err = index.add(&txn, &mut row(7, "b")).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateKey { .. }), "{err}");
    }

    #[test]
    fn test_find_range() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);
        let txn = store.begin().unwrap();
        for id in [1, 5, 10, 15, 20] {
            index.add(&txn, &mut row(id, "x")).unwrap();
        }

        assert_eq!(keys(index.find_range(&txn, 5, 15)), vec![5, 10, 15]);

        let first = Row::with_key(5, Vec::new());
        let last = Row::with_key(15, Vec::new());
        assert_eq!(keys(index.find(&txn, Some(&first), Some(&last)).unwrap()), vec![5, 10, 15]);
        assert_eq!(keys(index.find(&txn, None, Some(&first)).unwrap()), vec![1, 5]);
        assert_eq!(keys(index.find(&txn, None, None).unwrap()).len(), 5);
    }

    #[test]
    fn test_remove_and_get() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);
        let txn = store.begin().unwrap();
        let mut r = row(3, "three");
        index.add(&txn, &mut r).unwrap();

        assert_eq!(index.get_row(&txn, 3).unwrap(), r);
        index.remove(&txn, &r).unwrap();
        assert!(matches!(index.get_row(&txn, 3), Err(IndexError::RowNotFound { key: 3, .. })));
        assert!(matches!(index.remove(&txn, &r), Err(IndexError::RowNotFound { .. })));
    }

    #[test]
    fn test_update() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);
        let txn = store.begin().unwrap();
        let mut r = row(3, "three");
        index.add(&txn, &mut r).unwrap();

        let mut renamed = row(3, "THREE");
        index.update(&txn, &r, &mut renamed).unwrap();
        assert_eq!(renamed.key, 3);
        assert_eq!(index.get_row(&txn, 3).unwrap().values[1], Value::from("THREE"));

        let mut moved = row(4, "four");
        assert!(matches!(
            index.update(&txn, &r, &mut moved),
            Err(IndexError::Internal(_))
        ));

        let missing = Row::with_key(9, vec![Value::Long(9), Value::from("nine")]);
        let mut replacement = Row::with_key(9, vec![Value::Long(9), Value::from("NINE")]);
        assert!(matches!(
            index.update(&txn, &missing, &mut replacement),
            Err(IndexError::RowNotFound { key: 9, .. })
        ));
        assert_eq!(index.row_count(&txn).unwrap(), 1);
    }

    #[test]
    fn test_last_key_restored_from_uncommitted_rows() {
        let store = TransactionStore::in_memory();
        let index = PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap();

        let committed = store.begin().unwrap();
        index.add(&committed, &mut row(0, "a")).unwrap();
        committed.commit().unwrap();

        let open = store.begin().unwrap();
        let mut pending = Row::with_key(50, vec![Value::Long(0), Value::from("b")]);
        index.add(&open, &mut pending).unwrap();

        let reopened = PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap();
        assert_eq!(reopened.last_key(), 50);
    }

    #[test]
    fn test_find_first_or_last() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);
        let txn = store.begin().unwrap();

        assert_eq!(index.find_first_or_last(&txn, true).unwrap().count(), 0);

        for id in [4, 2, 9] {
            index.add(&txn, &mut row(id, "x")).unwrap();
        }
        assert_eq!(keys(index.find_first_or_last(&txn, true).unwrap()), vec![2]);
        assert_eq!(keys(index.find_first_or_last(&txn, false).unwrap()), vec![9]);
    }

    #[test]
    fn test_lock_row_timeout() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);
        let setup = store.begin().unwrap();
        index.add(&setup, &mut row(1, "a")).unwrap();
        setup.commit().unwrap();

        let owner = store.begin().unwrap();
        let locked = index.lock_row(&owner, 1, None).unwrap();
        assert_eq!(locked.map(|r| r.key), Some(1));
        assert_eq!(index.lock_row(&owner, 2, None).unwrap(), None);

        let other = store.begin().unwrap();
        let err = index
            .lock_row(&other, 1, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, IndexError::Txn(TxnError::LockTimeout { .. })), "{err}");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_row_counts() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);

        let a = store.begin().unwrap();
        index.add(&a, &mut row(1, "a")).unwrap();
        let b = store.begin().unwrap();
        index.add(&b, &mut row(2, "b")).unwrap();

        assert_eq!(index.row_count(&a).unwrap(), 1);
        assert_eq!(index.row_count_max(), 2);
        assert_eq!(index.row_count_approximation(), 2);
    }

    #[test]
    fn test_truncate() {
        let store = TransactionStore::in_memory();
        let index = keyed_index(&store);
        let setup = store.begin().unwrap();
        for id in 1..=3 {
            index.add(&setup, &mut row(id, "x")).unwrap();
        }
        setup.commit().unwrap();

        let txn = store.begin().unwrap();
        index.truncate(&txn).unwrap();
        assert_eq!(index.row_count(&txn).unwrap(), 0);

        let reader = store.begin().unwrap();
        assert_eq!(index.row_count(&reader).unwrap(), 3);
    }

    #[test]
    fn test_cost_scan() {
        let store = TransactionStore::in_memory();
        let index = PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap();
        assert_eq!(index.cost(None), 10.0 * 1000.0);
    }

    #[test]
    fn test_cost_full_key_equality() {
        let store = TransactionStore::in_memory();
        let index = PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap();
        let all = [IndexCondition::EQUALITY, IndexCondition::EQUALITY];
        assert_eq!(index.cost(Some(&all)), 30.0);

        let leading = [IndexCondition::EQUALITY, 0];
        assert!(index.cost(Some(&leading)) > 30.0);
    }

    #[test]
    fn test_drop_storage() {
        let store = TransactionStore::in_memory();
        let index = PrimaryIndex::new(&store, 1, "T", columns(), true).unwrap();
        index.drop_storage().unwrap();

        assert!(!store.has_map("table.1"));
        let txn = store.begin().unwrap();
        assert!(matches!(index.row_count(&txn), Err(IndexError::Closed(_))));
        index.drop_storage().unwrap();
    }
}
