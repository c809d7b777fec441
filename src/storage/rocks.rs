// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed durable map storage.

use std::path::Path;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions};

use super::codec::{decode_value, value_to_bytes};
use super::{
    decode_map_key, encode_map_key, map_prefix, MapChange, MapStore, StorageError, Value,
    MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes are synced to WAL but not fsynced to disk.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Writes are fsynced to disk on every commit.
    FsyncEveryWrite,
}

/// RocksDB-backed storage for committed entries of durable maps.
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_opts: WriteOptions,
}

impl RocksStore {
    /// Opens or creates a RocksDB database at the given path.
    ///
    /// Uses `DurabilityMode::WalOnly` by default.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_durability(path, DurabilityMode::default())
    }

    /// Opens or creates a RocksDB database with specified durability mode.
    pub fn open_with_durability(path: &Path, durability: DurabilityMode) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_write_buffer_size(64 * 1024 * 1024); // 64MB
        opts.set_max_write_buffer_number(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        Self::open_with_options(path, opts, durability)
    }

    /// Opens a database with custom RocksDB options.
    pub fn open_with_options(path: &Path, opts: Options, durability: DurabilityMode) -> Result<Self, StorageError> {
        let db = DBWithThreadMode::open(&opts, path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(durability == DurabilityMode::FsyncEveryWrite);

        Ok(Self { db, write_opts })
    }

    fn validate_key(encoded: &[u8]) -> Result<(), StorageError> {
        if encoded.len() > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size: encoded.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }

    fn validate_value(encoded: &[u8]) -> Result<(), StorageError> {
        if encoded.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: encoded.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(())
    }

    /// Collects the raw keys of every entry of `map`.
    fn map_keys(&self, map: &str) -> Result<Vec<Box<[u8]>>, StorageError> {
        let prefix = map_prefix(map);
        let mut keys = Vec::new();

        for item in self.db.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (encoded_key, _) = item?;
            if !encoded_key.starts_with(&prefix) {
                break;
            }
            keys.push(encoded_key);
        }

        Ok(keys)
    }
}

impl MapStore for RocksStore {
    fn load(&self, map: &str) -> Result<Vec<(Value, Value)>, StorageError> {
        let prefix = map_prefix(map);
        let mut entries = Vec::new();

        for item in self.db.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (encoded_key, encoded_value) = item?;
            if !encoded_key.starts_with(&prefix) {
                break;
            }

            let (_, key) = decode_map_key(&encoded_key)?;
            let value = decode_value(&encoded_value).map_err(|e| {
                StorageError::Corruption(format!("map {map}, key {key}: {e}"))
            })?;
            entries.push((key, value));
        }

        Ok(entries)
    }

    fn apply(&self, changes: Vec<MapChange>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();

        for change in changes {
            let encoded_key = encode_map_key(&change.map, &change.key);
            Self::validate_key(&encoded_key)?;

            match change.value {
                Some(value) => {
                    let encoded_value = value_to_bytes(&value);
                    Self::validate_value(&encoded_value)?;
                    batch.put(&encoded_key, &encoded_value);
                }
                None => batch.delete(&encoded_key),
            }
        }

        self.db.write_opt(batch, &self.write_opts)?;
        Ok(())
    }

    fn remove_map(&self, map: &str) -> Result<u64, StorageError> {
        let keys = self.map_keys(map)?;
        let removed = keys.len() as u64;

        for chunk in keys.chunks(1000) {
            let mut batch = WriteBatch::default();
            for key in chunk {
                batch.delete(key);
            }
            self.db.write_opt(batch, &self.write_opts)?;
        }

        Ok(removed)
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn row(id: i64, name: &str) -> Value {
        Value::Array(vec![Value::Long(id), Value::from(name)])
    }

    #[test]
    fn test_apply_and_load() {
        let (store, _dir) = create_test_store();

        store
            .apply(vec![
                MapChange::put("table.1", Value::Long(2), row(2, "b")),
                MapChange::put("table.1", Value::Long(1), row(1, "a")),
                MapChange::put("table.2", Value::Long(1), row(1, "other")),
            ])
            .unwrap();

        let loaded = store.load("table.1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&(Value::Long(1), row(1, "a"))));
        assert!(loaded.contains(&(Value::Long(2), row(2, "b"))));

        assert_eq!(store.load("table.2").unwrap().len(), 1);
        assert!(store.load("table.3").unwrap().is_empty());
    }

    #[test]
    fn test_delete_change() {
        let (store, _dir) = create_test_store();

        store
            .apply(vec![MapChange::put("m", Value::Long(1), Value::from("x"))])
            .unwrap();
        store.apply(vec![MapChange::delete("m", Value::Long(1))]).unwrap();

        assert!(store.load("m").unwrap().is_empty());
    }

    #[test]
    fn test_remove_map_leaves_others() {
        let (store, _dir) = create_test_store();

        let changes = (0..10)
            .map(|i| MapChange::put("table.1", Value::Long(i), Value::Long(i)))
            .chain(std::iter::once(MapChange::put(
                "table.10",
                Value::Long(0),
                Value::Long(0),
            )))
            .collect();
        store.apply(changes).unwrap();

        assert_eq!(store.remove_map("table.1").unwrap(), 10);
        assert!(store.load("table.1").unwrap().is_empty());
        assert_eq!(store.load("table.10").unwrap().len(), 1);
    }

    #[test]
    fn test_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store
                .apply(vec![MapChange::put("m", Value::Long(7), row(7, "kept"))])
                .unwrap();
            store.sync().unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.load("m").unwrap(), vec![(Value::Long(7), row(7, "kept"))]);
    }

    #[test]
    fn test_key_too_large() {
        let (store, _dir) = create_test_store();

        let key = Value::Bytes(vec![0u8; MAX_KEY_SIZE + 1]);
        let result = store.apply(vec![MapChange::put("m", key, Value::Null)]);
        assert!(matches!(result, Err(StorageError::KeyTooLarge { .. })));
    }
}
