// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The transaction store: transaction lifecycle, map registry and durability.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::StoreConfig;
use crate::storage::{
    GcStats, MapChange, MapStore, RocksStore, Value, VersionedMap, VersionedValue,
};

use super::error::TxnError;
use super::registry::Registry;
use super::transaction::{IsolationLevel, Transaction, TxnInner, TxnState, UndoEntry};
use super::wait::WaitQueue;
use super::TxnId;

pub(crate) struct StoreShared {
    config: StoreConfig,
    next_txn_id: AtomicU64,
    pub(crate) registry: RwLock<Registry>,
    maps: RwLock<HashMap<String, Arc<VersionedMap>>>,
    backend: Option<Arc<dyn MapStore>>,
    pub(crate) waiters: Arc<WaitQueue>,
    closed: AtomicBool,
}

/// Owns the shared maps and hands out transactions over them.
///
/// Cloning the store is cheap; clones share every map and transaction.
#[derive(Clone)]
pub struct TransactionStore {
    shared: Arc<StoreShared>,
}

impl TransactionStore {
    /// Opens a store. Durable maps are persisted in RocksDB when the
    /// configuration names a path.
    pub fn open(config: StoreConfig) -> Result<Self, TxnError> {
        let backend = match &config.path {
            Some(path) => {
                let rocks = RocksStore::open_with_durability(path, config.durability)?;
                Some(Arc::new(rocks) as Arc<dyn MapStore>)
            }
            None => None,
        };
        Ok(Self::with_backend(config, backend))
    }

    /// Creates a store over an explicit durable backend.
    pub fn with_backend(config: StoreConfig, backend: Option<Arc<dyn MapStore>>) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                config,
                next_txn_id: AtomicU64::new(1),
                registry: RwLock::new(Registry::default()),
                maps: RwLock::new(HashMap::new()),
                backend,
                waiters: Arc::new(WaitQueue::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::with_backend(StoreConfig::in_memory(), None)
    }

    /// Returns the configuration the store was opened with.
    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Returns true if committed changes of durable maps reach disk.
    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.shared.backend.is_some()
    }

    /// Begins a transaction at the configured isolation level.
    pub fn begin(&self) -> Result<Transaction, TxnError> {
        self.begin_with(self.shared.config.isolation)
    }

    /// Begins a transaction at the given isolation level.
    pub fn begin_with(&self, isolation: IsolationLevel) -> Result<Transaction, TxnError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TxnError::StoreClosed);
        }

        let id = TxnId(self.shared.next_txn_id.fetch_add(1, Ordering::Relaxed));
        let snapshot = self.shared.registry.write().register(id);
        debug!(txn_id = %id, snapshot, ?isolation, "began transaction");

        Ok(Transaction::new(
            id,
            isolation,
            snapshot,
            self.shared.config.lock_timeout,
            self.shared.clone(),
        ))
    }

    /// Opens the map `name`, creating it (or loading it from durable
    /// storage) on first use.
    pub fn open_map(&self, name: &str) -> Result<Arc<VersionedMap>, TxnError> {
        self.shared.open_map(name)
    }

    /// Returns true if the map `name` is open.
    pub fn has_map(&self, name: &str) -> bool {
        self.shared.maps.read().contains_key(name)
    }

    /// Removes a map and its durable contents. Open views of the map fail
    /// with [`TxnError::MapClosed`] from then on.
    pub fn remove_map(&self, name: &str) -> Result<(), TxnError> {
        let removed = self.shared.maps.write().remove(name);
        let volatile = match &removed {
            Some(map) => {
                map.close();
                map.clear_all();
                map.is_volatile()
            }
            None => false,
        };

        if let (Some(backend), false) = (&self.shared.backend, volatile) {
            let deleted = backend.remove_map(name)?;
            info!(map = name, deleted, "removed durable map");
        }
        Ok(())
    }

    /// Returns the version of the latest commit.
    pub fn commit_version(&self) -> u64 {
        self.shared.registry.read().current_version()
    }

    /// Number of transactions that have begun and not yet finished.
    pub fn active_count(&self) -> usize {
        self.shared.registry.read().len()
    }

    /// Prunes versions no active snapshot can read and drops deletes every
    /// snapshot already observes.
    #[instrument(skip(self))]
    pub fn gc(&self) -> GcStats {
        let watermark = self.shared.registry.read().watermark();
        let maps: Vec<_> = self.shared.maps.read().values().cloned().collect();

        let mut stats = GcStats::default();
        for map in maps {
            stats += map.gc(watermark);
        }

        info!(
            watermark,
            versions_scanned = stats.versions_scanned,
            versions_deleted = stats.versions_deleted,
            keys_removed = stats.keys_removed,
            "gc complete"
        );
        stats
    }

    /// Closes the store. New transactions and maps are refused; transactions
    /// already running may still finish.
    pub fn close(&self) -> Result<(), TxnError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(backend) = &self.shared.backend {
            backend.sync()?;
        }
        info!(active = self.active_count(), "closed transaction store");
        Ok(())
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl StoreShared {
    pub(crate) fn open_map(&self, name: &str) -> Result<Arc<VersionedMap>, TxnError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TxnError::StoreClosed);
        }
        if let Some(map) = self.maps.read().get(name) {
            return Ok(map.clone());
        }

        let mut maps = self.maps.write();
        if let Some(map) = maps.get(name) {
            return Ok(map.clone());
        }

        let map = match &self.backend {
            Some(backend) => {
                let entries: BTreeMap<Value, VersionedValue> = backend
                    .load(name)?
                    .into_iter()
                    .map(|(key, value)| (key, VersionedValue::committed(Some(value), 0)))
                    .collect();
                if !entries.is_empty() {
                    info!(map = name, entries = entries.len(), "loaded durable map");
                }
                VersionedMap::with_entries(name, entries)
            }
            None => VersionedMap::new(name),
        };

        let map = Arc::new(map);
        maps.insert(name.to_string(), map.clone());
        Ok(map)
    }

    pub(crate) fn prepare(&self, txn: &TxnInner) -> Result<(), TxnError> {
        let mut core = txn.core.lock();
        core.ensure_open(txn.id)?;
        core.state = TxnState::Prepared;
        debug!(txn_id = %txn.id, writes = core.undo.len(), "prepared transaction");
        Ok(())
    }

    #[instrument(skip(self, txn), fields(txn_id = %txn.id))]
    pub(crate) fn commit(&self, txn: &TxnInner) -> Result<u64, TxnError> {
        let mut core = txn.core.lock();
        core.ensure_unfinished(txn.id)?;
        let undo = std::mem::take(&mut core.undo);

        if let Some(backend) = &self.backend {
            let changes = durable_changes(&undo, txn.id);
            if !changes.is_empty() {
                if let Err(e) = backend.apply(changes) {
                    warn!(error = %e, "durable write failed, transaction left open");
                    core.undo = undo;
                    return Err(e.into());
                }
            }
        }

        let (version, watermark) = {
            let mut registry = self.registry.write();
            let version = registry.mark_committed(txn.id);
            (version, registry.watermark())
        };

        for entry in &undo {
            entry.map.commit_key(&entry.key, txn.id, version, watermark);
        }

        self.finish(txn.id);
        core.state = TxnState::Committed;
        debug!(writes = undo.len(), commit_version = version, "committed transaction");
        Ok(version)
    }

    #[instrument(skip(self, txn), fields(txn_id = %txn.id))]
    pub(crate) fn rollback(&self, txn: &TxnInner) -> Result<(), TxnError> {
        let mut core = txn.core.lock();
        core.ensure_unfinished(txn.id)?;
        let undo = std::mem::take(&mut core.undo);
        let writes = undo.len();

        undo_all(undo, txn.id);

        self.finish(txn.id);
        core.state = TxnState::RolledBack;
        debug!(writes, "rolled back transaction");
        Ok(())
    }

    pub(crate) fn rollback_to(&self, txn: &TxnInner, position: usize) -> Result<(), TxnError> {
        let mut core = txn.core.lock();
        core.ensure_open(txn.id)?;
        if position >= core.undo.len() {
            return Ok(());
        }

        let undone = core.undo.split_off(position);
        let writes = undone.len();
        undo_all(undone, txn.id);
        debug!(txn_id = %txn.id, writes, "rolled back to savepoint");
        Ok(())
    }

    /// Unregisters a finished transaction and wakes its waiters.
    fn finish(&self, id: TxnId) {
        self.registry.write().remove(id);
        self.waiters.notify_all();
    }

    /// Waits until `blocker` finishes, the lock timeout measured from
    /// `started` passes, the waiter is cancelled or waiting would deadlock.
    pub(crate) fn wait_for(
        &self,
        txn: &TxnInner,
        blocker: TxnId,
        key: &Value,
        started: Instant,
        timeout: Duration,
    ) -> Result<(), TxnError> {
        let mut guard = self.waiters.lock();

        {
            let mut registry = self.registry.write();
            if !registry.is_active(blocker) {
                return Ok(());
            }
            if timeout.is_zero() {
                return Err(TxnError::LockTimeout {
                    key: key.clone(),
                    blocker,
                    waited: Duration::ZERO,
                });
            }
            if !registry.block(txn.id, blocker) {
                warn!(txn_id = %txn.id, %blocker, %key, "deadlock detected");
                return Err(TxnError::Deadlock {
                    waiter: txn.id,
                    blocker,
                });
            }
        }

        let deadline = started.checked_add(timeout);
        trace!(txn_id = %txn.id, %blocker, %key, "waiting for row lock");

        let result = loop {
            if txn.cancelled.swap(false, Ordering::AcqRel) {
                warn!(txn_id = %txn.id, %key, "lock wait cancelled");
                break Err(TxnError::Cancelled(txn.id));
            }
            if !self.registry.read().is_active(blocker) {
                break Ok(());
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let waited = started.elapsed();
                warn!(txn_id = %txn.id, %blocker, %key, ?waited, "lock timeout");
                break Err(TxnError::LockTimeout {
                    key: key.clone(),
                    blocker,
                    waited,
                });
            }
            self.waiters.wait(&mut guard, deadline);
        };

        self.registry.write().unblock(txn.id);
        result
    }
}

/// Restores the prior versions of `undo`, newest write first.
fn undo_all(undo: Vec<UndoEntry>, owner: TxnId) {
    for entry in undo.into_iter().rev() {
        entry.map.restore(entry.key, entry.prior, owner);
    }
}

/// Collects the final value of every key the transaction wrote in a
/// durable map.
fn durable_changes(undo: &[UndoEntry], owner: TxnId) -> Vec<MapChange> {
    let mut seen = BTreeSet::new();
    let mut changes = Vec::new();

    for entry in undo {
        let map = &entry.map;
        if map.is_volatile() || map.is_closed() {
            continue;
        }
        if !seen.insert((map.name(), &entry.key)) {
            continue;
        }

        let entries = map.read();
        if let Some(head) = entries.get(&entry.key).filter(|h| h.owner() == Some(owner)) {
            changes.push(MapChange {
                map: map.name().to_string(),
                key: entry.key.clone(),
                value: head.value().cloned(),
            });
        }
    }

    changes
}
