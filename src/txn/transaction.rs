// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction types and state management.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::storage::{Value, VersionedMap, VersionedValue};

use super::error::TxnError;
use super::map::TransactionMap;
use super::store::StoreShared;
use super::wait::CancelHandle;

/// Unique transaction identifier. Ids are strictly increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each map view reads the data committed when the view was opened.
    ReadCommitted,
    /// Every read sees the data committed when the transaction began.
    #[default]
    Snapshot,
}

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Prepared,
    Committed,
    RolledBack,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxnState::Open => "open",
            TxnState::Prepared => "prepared",
            TxnState::Committed => "committed",
            TxnState::RolledBack => "rolled back",
        })
    }
}

/// Position in a transaction's undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(pub(crate) usize);

/// Undo record of one successful write.
#[derive(Debug)]
pub(crate) struct UndoEntry {
    pub(crate) map: Arc<VersionedMap>,
    pub(crate) key: Value,
    /// Head of the key before the write (`None` if the key was absent).
    pub(crate) prior: Option<VersionedValue>,
}

#[derive(Debug)]
pub(crate) struct TxnCore {
    pub(crate) state: TxnState,
    pub(crate) undo: Vec<UndoEntry>,
}

impl TxnCore {
    /// Fails unless the transaction can still write.
    pub(crate) fn ensure_open(&self, id: TxnId) -> Result<(), TxnError> {
        match self.state {
            TxnState::Open => Ok(()),
            state => Err(TxnError::NotOpen { id, state }),
        }
    }

    /// Fails unless the transaction can still commit or roll back.
    pub(crate) fn ensure_unfinished(&self, id: TxnId) -> Result<(), TxnError> {
        match self.state {
            TxnState::Open | TxnState::Prepared => Ok(()),
            state => Err(TxnError::NotOpen { id, state }),
        }
    }
}

pub(crate) struct TxnInner {
    pub(crate) id: TxnId,
    pub(crate) isolation: IsolationLevel,
    pub(crate) snapshot: u64,
    lock_timeout_ms: AtomicU64,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) core: Mutex<TxnCore>,
    pub(crate) store: Arc<StoreShared>,
}

impl TxnInner {
    #[inline]
    pub(crate) fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms.load(Ordering::Relaxed))
    }
}

impl Drop for TxnInner {
    fn drop(&mut self) {
        let unfinished = self.core.get_mut().ensure_unfinished(self.id).is_ok();
        if unfinished {
            warn!(txn_id = %self.id, "transaction dropped while open, rolling back");
            if let Err(e) = self.store.rollback(self) {
                warn!(txn_id = %self.id, error = %e, "rollback on drop failed");
            }
        }
    }
}

/// A transaction handle.
///
/// Handles are cheap to clone and share one transaction. Writes go straight
/// into the shared maps as uncommitted versions owned by the transaction and
/// are recorded in an undo log; commit publishes them all at once, rollback
/// replays the log in reverse. A transaction whose last handle is dropped
/// while still open is rolled back.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<TxnInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("isolation", &self.inner.isolation)
            .field("snapshot", &self.inner.snapshot)
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        id: TxnId,
        isolation: IsolationLevel,
        snapshot: u64,
        lock_timeout: Duration,
        store: Arc<StoreShared>,
    ) -> Self {
        Self {
            inner: Arc::new(TxnInner {
                id,
                isolation,
                snapshot,
                lock_timeout_ms: AtomicU64::new(duration_millis(lock_timeout)),
                cancelled: Arc::new(AtomicBool::new(false)),
                core: Mutex::new(TxnCore {
                    state: TxnState::Open,
                    undo: Vec::new(),
                }),
                store,
            }),
        }
    }

    /// Returns the transaction ID.
    #[inline]
    pub fn id(&self) -> TxnId {
        self.inner.id
    }

    /// Returns the isolation level.
    #[inline]
    pub fn isolation(&self) -> IsolationLevel {
        self.inner.isolation
    }

    /// Returns the commit version this transaction's snapshot was taken at.
    #[inline]
    pub fn snapshot(&self) -> u64 {
        self.inner.snapshot
    }

    /// Returns the current state.
    pub fn state(&self) -> TxnState {
        self.inner.core.lock().state
    }

    /// Returns true if the transaction is open.
    pub fn is_open(&self) -> bool {
        self.state() == TxnState::Open
    }

    /// Returns true if the transaction is committed.
    pub fn is_committed(&self) -> bool {
        self.state() == TxnState::Committed
    }

    /// Returns true if the transaction is rolled back.
    pub fn is_rolled_back(&self) -> bool {
        self.state() == TxnState::RolledBack
    }

    /// Returns the number of writes recorded in the undo log.
    pub fn write_count(&self) -> usize {
        self.inner.core.lock().undo.len()
    }

    /// Returns how long writes wait for another transaction's lock.
    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout()
    }

    /// Sets how long writes wait for another transaction's lock.
    /// A zero timeout fails immediately.
    pub fn set_lock_timeout(&self, timeout: Duration) {
        self.inner
            .lock_timeout_ms
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    /// Returns a handle that can interrupt this transaction's lock waits.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.inner.cancelled.clone(),
            waiters: self.inner.store.waiters.clone(),
        }
    }

    /// Opens a view of the map `name` bound to this transaction, creating the
    /// map if it does not exist.
    pub fn open_map(&self, name: &str) -> Result<TransactionMap, TxnError> {
        let map = self.inner.store.open_map(name)?;
        Ok(self.view(map))
    }

    /// Opens a view of an already opened map.
    pub fn view(&self, map: Arc<VersionedMap>) -> TransactionMap {
        let snapshot = match self.inner.isolation {
            IsolationLevel::Snapshot => self.inner.snapshot,
            IsolationLevel::ReadCommitted => self.inner.store.registry.read().current_version(),
        };
        TransactionMap::new(self.clone(), map, snapshot)
    }

    /// Moves an open transaction to the prepared state. A prepared
    /// transaction keeps its locks and accepts no more writes.
    pub fn prepare(&self) -> Result<(), TxnError> {
        self.inner.store.prepare(&self.inner)
    }

    /// Commits the transaction, returning its commit version.
    pub fn commit(&self) -> Result<u64, TxnError> {
        self.inner.store.commit(&self.inner)
    }

    /// Rolls back every write of the transaction.
    pub fn rollback(&self) -> Result<(), TxnError> {
        self.inner.store.rollback(&self.inner)
    }

    /// Marks the current position in the undo log.
    pub fn savepoint(&self) -> Result<Savepoint, TxnError> {
        let core = self.inner.core.lock();
        core.ensure_open(self.inner.id)?;
        Ok(Savepoint(core.undo.len()))
    }

    /// Undoes every write made after `savepoint`; the transaction stays open.
    pub fn rollback_to_savepoint(&self, savepoint: Savepoint) -> Result<(), TxnError> {
        self.inner.store.rollback_to(&self.inner, savepoint.0)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
