// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Registry of unfinished transactions and the global commit version.

use std::collections::HashMap;

use crate::storage::{Value, VersionedValue};

use super::TxnId;

#[derive(Debug, Clone, Copy)]
struct TxnEntry {
    snapshot: u64,
    committed_at: Option<u64>,
    blocked_on: Option<TxnId>,
}

/// Tracks every transaction that has begun and not yet finished.
///
/// A transaction stays registered until all of its versions have been
/// flipped to committed or restored, so a reader that finds a version owned
/// by a transaction can always tell whether that owner already committed.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    commit_version: u64,
    open: HashMap<TxnId, TxnEntry>,
}

impl Registry {
    /// Returns the version of the latest commit.
    #[inline]
    pub(crate) fn current_version(&self) -> u64 {
        self.commit_version
    }

    /// Registers a new transaction and returns its snapshot.
    pub(crate) fn register(&mut self, id: TxnId) -> u64 {
        let snapshot = self.commit_version;
        self.open.insert(
            id,
            TxnEntry {
                snapshot,
                committed_at: None,
                blocked_on: None,
            },
        );
        snapshot
    }

    /// Publishes the commit of `id` and returns its commit version.
    pub(crate) fn mark_committed(&mut self, id: TxnId) -> u64 {
        self.commit_version += 1;
        if let Some(entry) = self.open.get_mut(&id) {
            entry.committed_at = Some(self.commit_version);
            entry.blocked_on = None;
        }
        self.commit_version
    }

    /// Forgets a finished transaction.
    pub(crate) fn remove(&mut self, id: TxnId) {
        self.open.remove(&id);
    }

    /// Returns the commit version of `id` if it committed but is still
    /// registered.
    #[inline]
    pub(crate) fn committed_at(&self, id: TxnId) -> Option<u64> {
        self.open.get(&id).and_then(|entry| entry.committed_at)
    }

    /// Returns true while `id` can still commit or roll back.
    #[inline]
    pub(crate) fn is_active(&self, id: TxnId) -> bool {
        self.open
            .get(&id)
            .is_some_and(|entry| entry.committed_at.is_none())
    }

    /// Number of registered transactions.
    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }

    /// Oldest snapshot any active transaction may still read at.
    pub(crate) fn watermark(&self) -> u64 {
        self.open
            .values()
            .filter(|entry| entry.committed_at.is_none())
            .map(|entry| entry.snapshot)
            .min()
            .unwrap_or(self.commit_version)
    }

    /// Records that `waiter` waits for `blocker`.
    ///
    /// Returns false, recording nothing, if `blocker` already waits (directly
    /// or through other transactions) for `waiter`.
    pub(crate) fn block(&mut self, waiter: TxnId, blocker: TxnId) -> bool {
        let mut current = blocker;
        for _ in 0..=self.open.len() {
            if current == waiter {
                return false;
            }
            match self.open.get(&current).and_then(|entry| entry.blocked_on) {
                Some(next) => current = next,
                None => break,
            }
        }

        if let Some(entry) = self.open.get_mut(&waiter) {
            entry.blocked_on = Some(blocker);
        }
        true
    }

    /// Clears the wait edge of `waiter`.
    pub(crate) fn unblock(&mut self, waiter: TxnId) {
        if let Some(entry) = self.open.get_mut(&waiter) {
            entry.blocked_on = None;
        }
    }

    /// Resolves the value of `head` visible to `reader` at `snapshot`.
    ///
    /// The reader sees its own uncommitted version, otherwise the newest
    /// version committed at or before its snapshot.
    pub(crate) fn visible<'a>(
        &self,
        head: &'a VersionedValue,
        reader: TxnId,
        snapshot: u64,
    ) -> Option<&'a Value> {
        for version in head.versions() {
            let visible = match version.owner() {
                Some(owner) if owner == reader => true,
                Some(owner) => self.committed_at(owner).is_some_and(|c| c <= snapshot),
                None => version.commit_version() <= snapshot,
            };
            if visible {
                return version.value();
            }
        }
        None
    }
}
