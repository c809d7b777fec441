// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The shared ordered map of versioned entries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::txn::TxnId;

use super::{Value, VersionedValue};

/// Statistics from garbage collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub versions_scanned: u64,
    pub versions_deleted: u64,
    pub keys_removed: u64,
}

impl std::ops::AddAssign for GcStats {
    fn add_assign(&mut self, other: Self) {
        self.versions_scanned += other.versions_scanned;
        self.versions_deleted += other.versions_deleted;
        self.keys_removed += other.keys_removed;
    }
}

/// A sorted `Value -> VersionedValue` map shared by every transaction.
///
/// Reads of the raw content are public; every mutation is crate-private and
/// reachable only through a transaction's map view.
#[derive(Debug)]
pub struct VersionedMap {
    name: String,
    volatile: AtomicBool,
    closed: AtomicBool,
    entries: RwLock<BTreeMap<Value, VersionedValue>>,
}

impl VersionedMap {
    /// Creates an empty map.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self::with_entries(name, BTreeMap::new())
    }

    /// Creates a map holding previously committed entries.
    pub(crate) fn with_entries(
        name: impl Into<String>,
        entries: BTreeMap<Value, VersionedValue>,
    ) -> Self {
        Self {
            name: name.into(),
            volatile: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            entries: RwLock::new(entries),
        }
    }

    /// Returns the map name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the map's commits are never written to durable storage.
    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.volatile.load(Ordering::Acquire)
    }

    /// Marks the map volatile (not persisted) or durable.
    pub fn set_volatile(&self, volatile: bool) {
        self.volatile.store(volatile, Ordering::Release);
    }

    /// Returns true once the map has been removed from its store.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of entries, counting uncommitted entries of every transaction
    /// and deletes not yet cleaned up.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the map holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Smallest raw key, including uncommitted keys.
    pub fn first_key(&self) -> Option<Value> {
        self.entries.read().keys().next().cloned()
    }

    /// Largest raw key, including uncommitted keys.
    pub fn last_key(&self) -> Option<Value> {
        self.entries.read().keys().next_back().cloned()
    }

    /// Returns the newest committed value at `key`, ignoring snapshots.
    pub fn get_committed(&self, key: &Value) -> Option<Value> {
        self.entries
            .read()
            .get(key)
            .and_then(|head| head.latest_committed())
            .and_then(|v| v.value().cloned())
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Value, VersionedValue>> {
        self.entries.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Value, VersionedValue>> {
        self.entries.write()
    }

    /// Flips `owner`'s version at `key` to committed and prunes the chain.
    ///
    /// A head owned by someone else means another writer already committed
    /// this version on our behalf and stacked on top of it.
    pub(crate) fn commit_key(&self, key: &Value, owner: TxnId, version: u64, watermark: u64) {
        let mut entries = self.entries.write();
        let remove = match entries.get_mut(key) {
            Some(head) if head.owner == Some(owner) => {
                head.commit(version);
                head.prune(watermark);
                head.is_tombstone() && version <= watermark
            }
            _ => false,
        };
        if remove {
            entries.remove(key);
        }
    }

    /// Puts back the version that preceded a rolled back write.
    pub(crate) fn restore(&self, key: Value, prior: Option<VersionedValue>, owner: TxnId) {
        let mut entries = self.entries.write();
        debug_assert!(
            entries.get(&key).map_or(true, |head| head.owner == Some(owner)),
            "restoring a key not owned by {owner}"
        );
        match prior {
            Some(prior) => {
                entries.insert(key, prior);
            }
            None => {
                entries.remove(&key);
            }
        }
    }

    /// Prunes versions that no snapshot at or above `watermark` can see and
    /// drops deletes every such snapshot already observes.
    pub(crate) fn gc(&self, watermark: u64) -> GcStats {
        let mut stats = GcStats::default();
        let mut entries = self.entries.write();

        entries.retain(|_, head| {
            stats.versions_scanned += head.depth() as u64;
            stats.versions_deleted += head.prune(watermark) as u64;

            let dead =
                head.is_committed() && head.is_tombstone() && head.commit_version <= watermark;
            if dead {
                stats.versions_deleted += 1;
                stats.keys_removed += 1;
            }
            !dead
        });

        stats
    }

    /// Drops every entry of a closed map.
    pub(crate) fn clear_all(&self) {
        self.entries.write().clear();
    }
}
