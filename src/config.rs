// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction store configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::DurabilityMode;
use crate::txn::IsolationLevel;

/// Configuration for a [`TransactionStore`](crate::txn::TransactionStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a write waits for another transaction's row lock.
    pub lock_timeout: Duration,
    /// Isolation level of transactions started with `begin()`.
    pub isolation: IsolationLevel,
    /// RocksDB directory for durable maps (None = in-memory only).
    pub path: Option<PathBuf>,
    /// Sync policy for durable commits.
    pub durability: DurabilityMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            isolation: IsolationLevel::default(),
            path: None,
            durability: DurabilityMode::default(),
        }
    }
}

impl StoreConfig {
    /// Creates an in-memory configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a configuration persisting durable maps under `path`.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self::default().with_path(path)
    }

    /// Sets the default lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the default isolation level.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the RocksDB directory.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the durability mode.
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.isolation, IsolationLevel::Snapshot);
        assert!(config.path.is_none());
        assert_eq!(config.durability, DurabilityMode::WalOnly);
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::persistent("/tmp/db")
            .with_lock_timeout(Duration::ZERO)
            .with_isolation(IsolationLevel::ReadCommitted)
            .with_durability(DurabilityMode::FsyncEveryWrite);

        assert_eq!(config.path, Some(PathBuf::from("/tmp/db")));
        assert_eq!(config.lock_timeout, Duration::ZERO);
        assert_eq!(config.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.durability, DurabilityMode::FsyncEveryWrite);
    }
}
