// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! A transaction's view of a shared map.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;

use crate::storage::{Value, VersionedMap, VersionedValue};

use super::error::TxnError;
use super::registry::Registry;
use super::store::StoreShared;
use super::transaction::{Transaction, TxnCore, UndoEntry};
use super::TxnId;

/// Entries fetched per read-lock acquisition while iterating.
const ITER_BATCH: usize = 64;

/// What a write does to its key.
enum WriteOp {
    Put(Value),
    Remove,
    Lock,
}

/// Who holds a key, as seen by a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Vacant,
    Committed,
    Own,
    Blocked(TxnId),
}

/// Classifies the head of `key` for writer `me`.
///
/// A head still owned by a transaction that already committed is flipped to
/// committed on the spot, since that owner no longer blocks anyone.
fn classify(head: Option<&mut VersionedValue>, me: TxnId, registry: &Registry) -> Slot {
    let Some(head) = head else {
        return Slot::Vacant;
    };
    match head.owner {
        None => Slot::Committed,
        Some(owner) if owner == me => Slot::Own,
        Some(owner) => match registry.committed_at(owner) {
            Some(version) => {
                head.commit(version);
                Slot::Committed
            }
            None => {
                debug_assert!(registry.is_active(owner), "orphaned version of txn {owner}");
                Slot::Blocked(owner)
            }
        },
    }
}

/// Installs `value` as `me`'s version of `key` and returns the prior head.
fn install(
    entries: &mut BTreeMap<Value, VersionedValue>,
    key: &Value,
    slot: Slot,
    value: Option<Value>,
    me: TxnId,
) -> Option<VersionedValue> {
    let prior = entries.remove(key);
    let head = match (slot, prior.clone()) {
        (Slot::Own, Some(own)) => VersionedValue { value, ..own },
        (_, previous) => VersionedValue::uncommitted(me, value, previous),
    };
    entries.insert(key.clone(), head);
    prior
}

/// Returns true if no key can fall between `low` and `high`.
fn is_empty_range(low: &Bound<Value>, high: &Bound<Value>) -> bool {
    match (low, high) {
        (Bound::Included(l), Bound::Included(h)) => l > h,
        (Bound::Included(l), Bound::Excluded(h))
        | (Bound::Excluded(l), Bound::Included(h))
        | (Bound::Excluded(l), Bound::Excluded(h)) => l >= h,
        _ => false,
    }
}

/// A transaction's view of one [`VersionedMap`].
///
/// Reads see the map as of the view's snapshot plus the transaction's own
/// uncommitted writes, and never block. Once the transaction commits or rolls
/// back, every operation fails with [`TxnError::NotOpen`]. Writes take ownership of their key;
/// if another open transaction owns it, `put`, `remove` and `lock` wait for
/// it to finish while `put_if_absent` fails at once.
pub struct TransactionMap {
    txn: Transaction,
    map: Arc<VersionedMap>,
    snapshot: u64,
}

impl std::fmt::Debug for TransactionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMap")
            .field("map", &self.map.name())
            .field("txn_id", &self.txn.id())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl TransactionMap {
    pub(crate) fn new(txn: Transaction, map: Arc<VersionedMap>, snapshot: u64) -> Self {
        Self { txn, map, snapshot }
    }

    /// Returns the underlying shared map.
    #[inline]
    pub fn map(&self) -> &Arc<VersionedMap> {
        &self.map
    }

    /// Returns the transaction this view belongs to.
    #[inline]
    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    /// Returns the commit version this view reads at.
    #[inline]
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    fn shared(&self) -> &StoreShared {
        &self.txn.inner.store
    }

    fn ensure_map_open(&self) -> Result<(), TxnError> {
        if self.map.is_closed() {
            return Err(TxnError::MapClosed(self.map.name().to_string()));
        }
        Ok(())
    }

    /// Locks the transaction for a read. Holding the guard keeps the
    /// transaction's snapshot registered until the read is done.
    fn begin_read(&self) -> Result<MutexGuard<'_, TxnCore>, TxnError> {
        let core = self.txn.inner.core.lock();
        core.ensure_unfinished(self.txn.id())?;
        self.ensure_map_open()?;
        Ok(core)
    }

    /// Returns the value of `key` visible to this transaction.
    pub fn get(&self, key: &Value) -> Result<Option<Value>, TxnError> {
        let _core = self.begin_read()?;
        let entries = self.map.read();
        let registry = self.shared().registry.read();
        Ok(entries
            .get(key)
            .and_then(|head| registry.visible(head, self.txn.id(), self.snapshot))
            .cloned())
    }

    /// Returns the newest committed value of `key`, regardless of snapshot.
    pub fn get_committed(&self, key: &Value) -> Result<Option<Value>, TxnError> {
        let _core = self.begin_read()?;
        Ok(self.map.get_committed(key))
    }

    /// Returns true if `key` has a value visible to this transaction.
    pub fn contains_key(&self, key: &Value) -> Result<bool, TxnError> {
        Ok(self.get(key)?.is_some())
    }

    /// Writes `value` at `key`, returning the value it replaced.
    pub fn put(&self, key: Value, value: Value) -> Result<Option<Value>, TxnError> {
        self.write(key, WriteOp::Put(value), self.txn.lock_timeout())
    }

    /// Deletes `key`, returning the value it had. Deleting an absent key
    /// changes nothing.
    pub fn remove(&self, key: &Value) -> Result<Option<Value>, TxnError> {
        self.write(key.clone(), WriteOp::Remove, self.txn.lock_timeout())
    }

    /// Takes exclusive ownership of `key` without changing it, returning its
    /// current value. An absent key is not locked.
    pub fn lock(&self, key: &Value) -> Result<Option<Value>, TxnError> {
        self.lock_for(key, self.txn.lock_timeout())
    }

    /// Like [`lock`](Self::lock) but waits at most `timeout`.
    pub fn lock_for(&self, key: &Value, timeout: Duration) -> Result<Option<Value>, TxnError> {
        self.write(key.clone(), WriteOp::Lock, timeout)
    }

    /// Writes `value` at `key` only if the key holds no value.
    ///
    /// Never waits: fails with [`TxnError::DuplicateKey`] if a committed value
    /// or this transaction's own value occupies the key, and with
    /// [`TxnError::WriteConflict`] if another open transaction owns it.
    pub fn put_if_absent(&self, key: Value, value: Value) -> Result<(), TxnError> {
        let inner = &self.txn.inner;
        let mut core = inner.core.lock();
        core.ensure_open(inner.id)?;
        self.ensure_map_open()?;

        let mut entries = self.map.write();
        let slot = {
            let registry = self.shared().registry.read();
            classify(entries.get_mut(&key), inner.id, &registry)
        };

        match slot {
            Slot::Blocked(owner) => Err(TxnError::WriteConflict { key, owner }),
            _ if entries.get(&key).is_some_and(|head| !head.is_tombstone()) => {
                Err(TxnError::DuplicateKey { key })
            }
            slot => {
                let prior = install(&mut entries, &key, slot, Some(value), inner.id);
                core.undo.push(UndoEntry {
                    map: self.map.clone(),
                    key,
                    prior,
                });
                Ok(())
            }
        }
    }

    fn write(&self, key: Value, op: WriteOp, timeout: Duration) -> Result<Option<Value>, TxnError> {
        let inner = &self.txn.inner;
        let started = Instant::now();

        loop {
            let blocker = {
                let mut core = inner.core.lock();
                core.ensure_open(inner.id)?;
                self.ensure_map_open()?;

                let mut entries = self.map.write();
                let slot = {
                    let registry = self.shared().registry.read();
                    classify(entries.get_mut(&key), inner.id, &registry)
                };

                match slot {
                    Slot::Blocked(owner) => owner,
                    slot => {
                        let current = entries.get(&key).and_then(|head| head.value().cloned());
                        let value = match op {
                            WriteOp::Put(value) => Some(value),
                            WriteOp::Remove if current.is_none() => return Ok(None),
                            WriteOp::Remove => None,
                            WriteOp::Lock if current.is_none() || slot == Slot::Own => {
                                return Ok(current);
                            }
                            WriteOp::Lock => current.clone(),
                        };

                        let prior = install(&mut entries, &key, slot, value, inner.id);
                        core.undo.push(UndoEntry {
                            map: self.map.clone(),
                            key,
                            prior,
                        });
                        return Ok(current);
                    }
                }
            };

            self.shared()
                .wait_for(inner, blocker, &key, started, timeout)?;
        }
    }

    /// Iterates visible entries with keys between `low` and `high`, in key
    /// order.
    ///
    /// The iterator reads the map in batches and never holds a lock between
    /// calls to `next`, so it observes this transaction's later writes to
    /// keys it has not reached yet.
    pub fn entry_iter(&self, low: Bound<Value>, high: Bound<Value>) -> EntryIter {
        EntryIter {
            map: self.map.clone(),
            txn: self.txn.clone(),
            snapshot: self.snapshot,
            next_low: low,
            high,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Iterates every visible entry in key order.
    pub fn iter(&self) -> EntryIter {
        self.entry_iter(Bound::Unbounded, Bound::Unbounded)
    }

    /// Returns the smallest visible key.
    pub fn first_key(&self) -> Result<Option<Value>, TxnError> {
        self.iter().next().transpose().map(|entry| entry.map(|(key, _)| key))
    }

    /// Returns the largest visible key.
    pub fn last_key(&self) -> Result<Option<Value>, TxnError> {
        let _core = self.begin_read()?;
        let entries = self.map.read();
        let registry = self.shared().registry.read();
        Ok(entries
            .iter()
            .rev()
            .find(|(_, head)| registry.visible(head, self.txn.id(), self.snapshot).is_some())
            .map(|(key, _)| key.clone()))
    }

    /// Counts the entries visible to this transaction.
    pub fn size(&self) -> Result<usize, TxnError> {
        let _core = self.begin_read()?;
        let entries = self.map.read();
        let registry = self.shared().registry.read();
        Ok(entries
            .values()
            .filter(|head| registry.visible(head, self.txn.id(), self.snapshot).is_some())
            .count())
    }

    /// Raw entry count of the map, including uncommitted entries of every
    /// transaction and deletes not yet cleaned up. Cheap, but only an upper
    /// bound of [`size`](Self::size).
    pub fn size_max(&self) -> usize {
        self.map.len()
    }

    /// Deletes every visible entry within this transaction.
    pub fn clear(&self) -> Result<usize, TxnError> {
        let keys = self
            .iter()
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<Vec<_>, _>>()?;

        let mut removed = 0;
        for key in &keys {
            if self.remove(key)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Lazy iterator over the visible entries of a key range.
pub struct EntryIter {
    map: Arc<VersionedMap>,
    txn: Transaction,
    snapshot: u64,
    next_low: Bound<Value>,
    high: Bound<Value>,
    buffer: VecDeque<(Value, Value)>,
    done: bool,
}

impl EntryIter {
    fn fill(&mut self) -> Result<(), TxnError> {
        let inner = &self.txn.inner;
        let core = inner.core.lock();
        if let Err(e) = core.ensure_unfinished(inner.id) {
            self.done = true;
            return Err(e);
        }
        if self.map.is_closed() {
            self.done = true;
            return Err(TxnError::MapClosed(self.map.name().to_string()));
        }
        if is_empty_range(&self.next_low, &self.high) {
            self.done = true;
            return Ok(());
        }

        let entries = self.map.read();
        let registry = inner.store.registry.read();
        let range = (self.next_low.as_ref(), self.high.as_ref());

        let mut scanned = 0;
        let mut last = None;
        for (key, head) in entries.range::<Value, _>(range) {
            scanned += 1;
            if let Some(value) = registry.visible(head, inner.id, self.snapshot) {
                self.buffer.push_back((key.clone(), value.clone()));
            }
            if scanned == ITER_BATCH {
                last = Some(key.clone());
                break;
            }
        }

        match last {
            Some(key) => self.next_low = Bound::Excluded(key),
            None => self.done = true,
        }
        Ok(())
    }
}

impl Iterator for EntryIter {
    type Item = Result<(Value, Value), TxnError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{IsolationLevel, TransactionStore};
    use std::thread;

    fn seeded(keys: &[i64]) -> TransactionStore {
        let store = TransactionStore::in_memory();
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();
        for &k in keys {
            map.put(Value::Long(k), Value::Long(k * 10)).unwrap();
        }
        txn.commit().unwrap();
        store
    }

    fn keys(iter: EntryIter) -> Vec<i64> {
        iter.map(|entry| entry.unwrap().0.to_long().unwrap()).collect()
    }

    #[test]
    fn test_read_your_writes() {
        let store = TransactionStore::in_memory();
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        assert_eq!(map.put(Value::Long(1), Value::from("a")).unwrap(), None);
        assert_eq!(map.get(&Value::Long(1)).unwrap(), Some(Value::from("a")));
        assert_eq!(
            map.put(Value::Long(1), Value::from("b")).unwrap(),
            Some(Value::from("a"))
        );
        assert_eq!(map.get_committed(&Value::Long(1)).unwrap(), None);

        let other = store.begin().unwrap();
        assert_eq!(other.open_map("m").unwrap().get(&Value::Long(1)).unwrap(), None);
    }

    #[test]
    fn test_range_inclusive() {
        let store = seeded(&[1, 5, 10, 15, 20]);
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        let iter = map.entry_iter(
            Bound::Included(Value::Long(5)),
            Bound::Included(Value::Long(15)),
        );
        assert_eq!(keys(iter), vec![5, 10, 15]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let store = seeded(&[1, 2, 3]);
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        let iter = map.entry_iter(Bound::Included(Value::Long(3)), Bound::Included(Value::MIN_LONG));
        assert!(keys(iter).is_empty());
        let iter = map.entry_iter(Bound::Excluded(Value::Long(2)), Bound::Excluded(Value::Long(2)));
        assert!(keys(iter).is_empty());
    }

    #[test]
    fn test_iter_spans_batches() {
        let all: Vec<i64> = (0..(ITER_BATCH as i64 * 3 + 7)).collect();
        let store = seeded(&all);
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();
        map.remove(&Value::Long(ITER_BATCH as i64)).unwrap();

        let seen = keys(map.iter());
        assert_eq!(seen.len(), all.len() - 1);
        assert!(!seen.contains(&(ITER_BATCH as i64)));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_first_last_size() {
        let store = seeded(&[3, 4, 5]);
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();
        map.remove(&Value::Long(5)).unwrap();
        map.put(Value::Long(1), Value::Long(10)).unwrap();

        assert_eq!(map.first_key().unwrap(), Some(Value::Long(1)));
        assert_eq!(map.last_key().unwrap(), Some(Value::Long(4)));
        assert_eq!(map.size().unwrap(), 3);
        assert_eq!(map.size_max(), 4);

        // Another transaction's uncommitted key is not visible.
        let other = store.begin().unwrap();
        let other_map = other.open_map("m").unwrap();
        assert_eq!(other_map.first_key().unwrap(), Some(Value::Long(3)));
        assert_eq!(other_map.last_key().unwrap(), Some(Value::Long(5)));
    }

    #[test]
    fn test_remove_absent_key() {
        let store = TransactionStore::in_memory();
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        assert_eq!(map.remove(&Value::Long(1)).unwrap(), None);
        assert_eq!(txn.write_count(), 0);
        assert_eq!(map.lock(&Value::Long(1)).unwrap(), None);
        assert_eq!(map.size_max(), 0);
    }

    #[test]
    fn test_put_if_absent() {
        let store = seeded(&[1]);
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        assert!(matches!(
            map.put_if_absent(Value::Long(1), Value::Long(0)),
            Err(TxnError::DuplicateKey { .. })
        ));
        map.put_if_absent(Value::Long(2), Value::Long(20)).unwrap();
        assert!(matches!(
            map.put_if_absent(Value::Long(2), Value::Long(0)),
            Err(TxnError::DuplicateKey { .. })
        ));

        let other = store.begin().unwrap();
        let result = other
            .open_map("m")
            .unwrap()
            .put_if_absent(Value::Long(2), Value::Long(0));
        assert!(matches!(
            result,
            Err(TxnError::WriteConflict { owner, .. }) if owner == txn.id()
        ));

        // A deleted key is free again.
        map.remove(&Value::Long(1)).unwrap();
        map.put_if_absent(Value::Long(1), Value::Long(11)).unwrap();
        assert_eq!(map.get(&Value::Long(1)).unwrap(), Some(Value::Long(11)));
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = seeded(&[1]);
        let early = store.begin().unwrap();
        let early_map = early.open_map("m").unwrap();

        let writer = store.begin().unwrap();
        writer
            .open_map("m")
            .unwrap()
            .put(Value::Long(1), Value::from("new"))
            .unwrap();
        writer.commit().unwrap();

        assert_eq!(early_map.get(&Value::Long(1)).unwrap(), Some(Value::Long(10)));
        // Views opened later in a snapshot transaction keep the begin snapshot.
        assert_eq!(
            early.open_map("m").unwrap().get(&Value::Long(1)).unwrap(),
            Some(Value::Long(10))
        );

        let late = store.begin().unwrap();
        assert_eq!(
            late.open_map("m").unwrap().get(&Value::Long(1)).unwrap(),
            Some(Value::from("new"))
        );
    }

    #[test]
    fn test_read_committed_views_refresh() {
        let store = seeded(&[1]);
        let reader = store.begin_with(IsolationLevel::ReadCommitted).unwrap();
        let first_view = reader.open_map("m").unwrap();

        let writer = store.begin().unwrap();
        writer
            .open_map("m")
            .unwrap()
            .put(Value::Long(1), Value::from("new"))
            .unwrap();
        writer.commit().unwrap();

        assert_eq!(first_view.get(&Value::Long(1)).unwrap(), Some(Value::Long(10)));
        assert_eq!(
            reader.open_map("m").unwrap().get(&Value::Long(1)).unwrap(),
            Some(Value::from("new"))
        );
    }

    #[test]
    fn test_lock_blocks_until_commit() {
        let store = seeded(&[1]);
        let owner = store.begin().unwrap();
        owner
            .open_map("m")
            .unwrap()
            .put(Value::Long(1), Value::from("owner"))
            .unwrap();

        let locker = {
            let store = store.clone();
            thread::spawn(move || {
                let txn = store.begin().unwrap();
                let map = txn.open_map("m").unwrap();
                let started = Instant::now();
                let value = map.lock_for(&Value::Long(1), Duration::from_secs(10)).unwrap();
                (value, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        owner.commit().unwrap();

        let (value, waited) = locker.join().unwrap();
        assert_eq!(value, Some(Value::from("owner")));
        assert!(waited >= Duration::from_millis(40));
    }

    #[test]
    fn test_lock_timeout() {
        let store = seeded(&[1]);
        let owner = store.begin().unwrap();
        owner.open_map("m").unwrap().lock(&Value::Long(1)).unwrap();

        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        let result = map.lock_for(&Value::Long(1), Duration::from_millis(30));
        match result {
            Err(TxnError::LockTimeout { blocker, waited, .. }) => {
                assert_eq!(blocker, owner.id());
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }

        assert!(matches!(
            map.lock_for(&Value::Long(1), Duration::ZERO),
            Err(TxnError::LockTimeout { .. })
        ));
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let store = seeded(&[1]);
        let owner = store.begin().unwrap();
        owner.open_map("m").unwrap().lock(&Value::Long(1)).unwrap();

        let txn = store.begin().unwrap();
        let cancel = txn.cancel_handle();
        let waiter = thread::spawn(move || {
            let map = txn.open_map("m").unwrap();
            let result = map.lock_for(&Value::Long(1), Duration::from_secs(10));
            (result, txn)
        });

        thread::sleep(Duration::from_millis(30));
        cancel.cancel();

        let (result, txn) = waiter.join().unwrap();
        assert!(matches!(result, Err(TxnError::Cancelled(_))));
        assert!(txn.is_open());
        assert_eq!(txn.write_count(), 0);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_deadlock_detected() {
        let store = seeded(&[1, 2]);
        let a = store.begin().unwrap();
        let b = store.begin().unwrap();
        a.open_map("m").unwrap().lock(&Value::Long(1)).unwrap();
        b.open_map("m").unwrap().lock(&Value::Long(2)).unwrap();

        let a_waits = {
            let a = a.clone();
            thread::spawn(move || {
                let map = a.open_map("m").unwrap();
                map.lock_for(&Value::Long(2), Duration::from_secs(10)).map(|_| ())
            })
        };

        thread::sleep(Duration::from_millis(50));
        let result = b
            .open_map("m")
            .unwrap()
            .lock_for(&Value::Long(1), Duration::from_secs(10));
        assert!(matches!(result, Err(TxnError::Deadlock { .. })));

        b.rollback().unwrap();
        a_waits.join().unwrap().unwrap();
        a.commit().unwrap();
    }

    #[test]
    fn test_clear() {
        let store = seeded(&[1, 2, 3]);
        let txn = store.begin().unwrap();
        let map = txn.open_map("m").unwrap();

        assert_eq!(map.clear().unwrap(), 3);
        assert_eq!(map.size().unwrap(), 0);
        txn.rollback().unwrap();

        let txn = store.begin().unwrap();
        assert_eq!(txn.open_map("m").unwrap().size().unwrap(), 3);
    }
}
