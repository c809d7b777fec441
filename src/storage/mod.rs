// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Multi-version map storage.
//!
//! This module holds the data side of the engine: the dynamically typed
//! [`Value`], the [`VersionedValue`] chains that record uncommitted and
//! historical versions of an entry, and the shared ordered [`VersionedMap`]
//! that every transaction reads and writes through.
//!
//! # Key Concepts
//!
//! Each map entry is the head of a chain of versions, newest first. The head
//! is either committed or owned by the single transaction allowed to write
//! the key. Older committed versions stay linked until no open snapshot can
//! reach them, after which commit or [`VersionedMap`] garbage collection
//! prunes them.
//!
//! Committed values of durable maps are also written to a [`MapStore`]; the
//! RocksDB implementation is [`RocksStore`].
//!
//! # Example
//!
//! ```no_run
//! use mvtable::storage::{MapChange, MapStore, RocksStore, Value};
//! use std::path::Path;
//!
//! let store = RocksStore::open(Path::new("/tmp/mvtable")).unwrap();
//! store
//!     .apply(vec![MapChange::put("table.1", Value::Long(1), Value::from("row"))])
//!     .unwrap();
//! assert_eq!(store.load("table.1").unwrap().len(), 1);
//! ```

mod backend;
pub mod codec;
mod error;
mod key;
mod map;
mod rocks;
mod value;
mod versioned;

pub use backend::{MapChange, MapStore};
pub use error::StorageError;
pub use key::{decode_map_key, encode_map_key, extract_map_name, map_prefix};
pub use map::{GcStats, VersionedMap};
pub use rocks::{DurabilityMode, RocksStore};
pub use value::Value;
pub use versioned::VersionedValue;

/// Maximum encoded key size (8KB).
pub const MAX_KEY_SIZE: usize = 8 * 1024;

/// Maximum encoded value size (64MB).
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;
