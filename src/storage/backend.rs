// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Durable storage trait for committed map contents.

use super::{StorageError, Value};

/// One committed change to a durable map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapChange {
    pub map: String,
    pub key: Value,
    /// `None` deletes the key.
    pub value: Option<Value>,
}

impl MapChange {
    /// Creates a change that writes `value` at `key`.
    pub fn put(map: impl Into<String>, key: Value, value: Value) -> Self {
        Self {
            map: map.into(),
            key,
            value: Some(value),
        }
    }

    /// Creates a change that deletes `key`.
    pub fn delete(map: impl Into<String>, key: Value) -> Self {
        Self {
            map: map.into(),
            key,
            value: None,
        }
    }
}

/// Durable backing store for committed map entries.
///
/// Only committed data reaches the store: a transaction's changes are applied
/// as one atomic batch before the commit becomes visible.
pub trait MapStore: Send + Sync {
    /// Loads every committed entry of `map`.
    fn load(&self, map: &str) -> Result<Vec<(Value, Value)>, StorageError>;

    /// Atomically applies a batch of committed changes.
    fn apply(&self, changes: Vec<MapChange>) -> Result<(), StorageError>;

    /// Deletes every entry of `map`, returning how many were deleted.
    fn remove_map(&self, map: &str) -> Result<u64, StorageError>;

    /// Forces buffered writes to disk.
    fn sync(&self) -> Result<(), StorageError>;
}
