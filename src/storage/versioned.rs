// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Versioned values: a stored value, its uncommitted owner and the version it
//! superseded.

use crate::txn::TxnId;

use super::Value;

/// One version of a map entry, linked to the version it replaced.
///
/// The head of a chain is either committed (`owner == None`) or owned by the
/// single transaction allowed to write the key. Everything below the head is
/// committed, newest first. `value == None` marks a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub(crate) value: Option<Value>,
    pub(crate) owner: Option<TxnId>,
    pub(crate) commit_version: u64,
    pub(crate) previous: Option<Box<VersionedValue>>,
}

impl VersionedValue {
    /// Creates a committed version.
    pub fn committed(value: Option<Value>, commit_version: u64) -> Self {
        Self {
            value,
            owner: None,
            commit_version,
            previous: None,
        }
    }

    /// Creates an uncommitted version owned by `owner`, stacked on `previous`.
    pub fn uncommitted(owner: TxnId, value: Option<Value>, previous: Option<VersionedValue>) -> Self {
        Self {
            value,
            owner: Some(owner),
            commit_version: 0,
            previous: previous.map(Box::new),
        }
    }

    /// Returns the value of this version (`None` for a delete).
    #[inline]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the transaction owning this version while it is uncommitted.
    #[inline]
    pub fn owner(&self) -> Option<TxnId> {
        self.owner
    }

    /// Returns the commit version (meaningless while uncommitted).
    #[inline]
    pub fn commit_version(&self) -> u64 {
        self.commit_version
    }

    /// Returns the version this one superseded.
    #[inline]
    pub fn previous(&self) -> Option<&VersionedValue> {
        self.previous.as_deref()
    }

    /// Returns true if no transaction owns this version.
    #[inline]
    pub fn is_committed(&self) -> bool {
        self.owner.is_none()
    }

    /// Returns true if this version deletes the key.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Iterates the chain, newest version first.
    pub fn versions(&self) -> impl Iterator<Item = &VersionedValue> {
        std::iter::successors(Some(self), |v| v.previous.as_deref())
    }

    /// Number of versions in the chain.
    pub fn depth(&self) -> usize {
        self.versions().count()
    }

    /// Returns the newest committed value, skipping an uncommitted head.
    pub fn latest_committed(&self) -> Option<&VersionedValue> {
        self.versions().find(|v| v.is_committed())
    }

    /// Marks the version committed at `version`.
    pub(crate) fn commit(&mut self, version: u64) {
        self.owner = None;
        self.commit_version = version;
    }

    /// Drops every version older than the newest committed version at or
    /// below `watermark`. Returns the number of versions dropped.
    pub(crate) fn prune(&mut self, watermark: u64) -> usize {
        if self.is_committed() && self.commit_version <= watermark {
            return self.previous.take().map_or(0, |p| p.depth());
        }
        match self.previous.as_deref_mut() {
            Some(prev) => prev.prune(watermark),
            None => 0,
        }
    }
}
