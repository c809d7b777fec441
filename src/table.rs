// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tables: schema, indices and the per-transaction table handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::config::StoreConfig;
use crate::index::{Column, Cursor, DelegateIndex, Index, IndexError, PrimaryIndex, Row};
use crate::storage::GcStats;
use crate::txn::{Transaction, TransactionStore};

/// Table definition.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub id: u32,
    pub name: String,
    pub columns: Vec<Column>,
    /// Integer column that supplies row ids.
    pub primary_key: Option<usize>,
    /// Non-persistent tables are never written to durable storage.
    pub persistent: bool,
}

impl TableSchema {
    /// Creates a persistent table with no columns.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            persistent: true,
        }
    }

    /// Appends a column.
    pub fn with_column(mut self, name: impl Into<String>) -> Self {
        let id = self.columns.len();
        self.columns.push(Column::new(id, name));
        self
    }

    /// Makes the column at `column` the primary key.
    pub fn with_primary_key(mut self, column: usize) -> Self {
        self.primary_key = Some(column);
        self
    }

    /// Sets whether the table is persisted.
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

/// A table and its indices.
pub struct Table {
    schema: TableSchema,
    primary: Arc<PrimaryIndex>,
    delegate: Option<DelegateIndex>,
}

impl Table {
    fn create(store: &TransactionStore, schema: TableSchema) -> Result<Self, IndexError> {
        if let Some(column) = schema.primary_key.filter(|&c| c >= schema.columns.len()) {
            return Err(IndexError::Internal(format!(
                "{}: primary key column {column} out of range",
                schema.name
            )));
        }

        let primary = Arc::new(PrimaryIndex::new(
            store,
            schema.id,
            &schema.name,
            schema.columns.clone(),
            schema.persistent,
        )?);

        let delegate = match schema.primary_key {
            Some(column) => {
                primary.set_main_index_column(Some(column));
                let name = format!("PRIMARY_KEY_{}", schema.name);
                Some(DelegateIndex::new(schema.id, name, primary.clone())?)
            }
            None => None,
        };

        Ok(Self {
            schema,
            primary,
            delegate,
        })
    }

    /// Returns the table schema.
    #[inline]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Returns the primary index.
    #[inline]
    pub fn primary(&self) -> &Arc<PrimaryIndex> {
        &self.primary
    }

    /// Returns the primary key index, if the table has one.
    #[inline]
    pub fn delegate(&self) -> Option<&DelegateIndex> {
        self.delegate.as_ref()
    }

    /// Every index of the table, primary index first.
    pub fn indexes(&self) -> Vec<&dyn Index> {
        let mut indexes: Vec<&dyn Index> = vec![self.primary.as_ref()];
        if let Some(delegate) = &self.delegate {
            indexes.push(delegate);
        }
        indexes
    }

    /// The index `scan` reads through: the primary key index if there is
    /// one, otherwise the primary index.
    pub fn scan_index(&self) -> &dyn Index {
        match &self.delegate {
            Some(delegate) => delegate,
            None => self.primary.as_ref(),
        }
    }

    /// Returns the cheapest index for the given condition masks.
    pub fn best_index(&self, masks: Option<&[u32]>) -> &dyn Index {
        self.indexes()
            .into_iter()
            .min_by(|a, b| a.cost(masks).total_cmp(&b.cost(masks)))
            .unwrap_or(self.primary.as_ref())
    }
}

/// A transaction store plus the tables defined over it.
pub struct Database {
    store: TransactionStore,
    tables: RwLock<HashMap<u32, Arc<Table>>>,
}

impl Database {
    /// Opens a database with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, IndexError> {
        Ok(Self::with_store(TransactionStore::open(config)?))
    }

    /// Creates an in-memory database.
    pub fn in_memory() -> Self {
        Self::with_store(TransactionStore::in_memory())
    }

    /// Creates a database over an existing store.
    pub fn with_store(store: TransactionStore) -> Self {
        Self {
            store,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the underlying transaction store.
    #[inline]
    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    /// Begins a transaction.
    pub fn begin(&self) -> Result<Transaction, IndexError> {
        Ok(self.store.begin()?)
    }

    /// Creates a table, or opens the rows persisted for its id by an earlier
    /// run.
    pub fn create_table(&self, schema: TableSchema) -> Result<Arc<Table>, IndexError> {
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.id) {
            return Err(IndexError::Internal(format!(
                "table {} already exists",
                schema.id
            )));
        }

        let (id, name) = (schema.id, schema.name.clone());
        let table = Arc::new(Table::create(&self.store, schema)?);
        tables.insert(id, table.clone());
        info!(table_id = id, table = %name, rows = table.primary.row_count_max(), "created table");
        Ok(table)
    }

    /// Returns the table with the given id.
    pub fn table(&self, id: u32) -> Result<Arc<Table>, IndexError> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(IndexError::TableNotFound(id))
    }

    /// Opens table `id` for use within `txn`.
    pub fn open_table(&self, txn: &Transaction, id: u32) -> Result<TableHandle, IndexError> {
        Ok(TableHandle {
            table: self.table(id)?,
            txn: txn.clone(),
        })
    }

    /// Drops a table and its stored rows.
    pub fn drop_table(&self, id: u32) -> Result<(), IndexError> {
        let table = self
            .tables
            .write()
            .remove(&id)
            .ok_or(IndexError::TableNotFound(id))?;

        if let Some(delegate) = &table.delegate {
            delegate.drop_index();
        }
        table.primary.drop_storage()?;
        info!(table_id = id, table = %table.schema.name, "dropped table");
        Ok(())
    }

    /// Prunes row versions no running transaction can read.
    pub fn gc(&self) -> GcStats {
        self.store.gc()
    }
}

/// A table bound to one transaction.
pub struct TableHandle {
    table: Arc<Table>,
    txn: Transaction,
}

impl TableHandle {
    /// Returns the table.
    #[inline]
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Returns the transaction the handle works in.
    #[inline]
    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    /// Inserts a row and returns its row id.
    pub fn insert(&self, mut row: Row) -> Result<i64, IndexError> {
        for index in self.table.indexes() {
            index.add(&self.txn, &mut row)?;
        }
        Ok(row.key)
    }

    /// Returns the row with the given row id.
    pub fn get(&self, key: i64) -> Result<Option<Row>, IndexError> {
        match self.table.primary.get_row(&self.txn, key) {
            Ok(row) => Ok(Some(row)),
            Err(IndexError::RowNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deletes the row with the given row id.
    pub fn delete(&self, key: i64) -> Result<(), IndexError> {
        let row = self.table.primary.get_row(&self.txn, key)?;
        for index in self.table.indexes() {
            index.remove(&self.txn, &row)?;
        }
        Ok(())
    }

    /// Replaces the row `key` with `row`, returning the new row id. If the
    /// new values change the primary key, the row moves to the new id.
    pub fn update(&self, key: i64, mut row: Row) -> Result<i64, IndexError> {
        let old = self.table.primary.get_row(&self.txn, key)?;
        let new_key = match self.table.primary.main_index_column() {
            Some(_) => self.table.primary.key_from_row(Some(&row), key, key)?,
            None => key,
        };

        if new_key != key {
            for index in self.table.indexes() {
                index.remove(&self.txn, &old)?;
            }
            row.key = 0;
            return self.insert(row);
        }

        row.key = key;
        for index in self.table.indexes() {
            index.update(&self.txn, &old, &mut row)?;
        }
        Ok(key)
    }

    /// Scans the rows between two search rows (inclusive; `None` leaves that
    /// side open). Bounds are read from the primary key column if the table
    /// has one, otherwise from the rows' row ids.
    pub fn scan(&self, first: Option<&Row>, last: Option<&Row>) -> Result<Cursor, IndexError> {
        self.table.scan_index().find(&self.txn, first, last)
    }

    /// Locks a row, waiting at most `timeout` for another transaction that
    /// holds it. Returns `None` if the row does not exist.
    pub fn lock_row(&self, key: i64, timeout: Duration) -> Result<Option<Row>, IndexError> {
        self.table.primary.lock_row(&self.txn, key, Some(timeout))
    }

    /// Number of rows visible to the transaction.
    pub fn row_count(&self) -> Result<u64, IndexError> {
        self.table.primary.row_count(&self.txn)
    }

    /// Deletes every row within the transaction.
    pub fn truncate(&self) -> Result<(), IndexError> {
        for index in self.table.indexes() {
            index.truncate(&self.txn)?;
        }
        Ok(())
    }
}
