// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Index error types.

use crate::storage::StorageError;
use crate::txn::TxnError;

/// Errors that can occur in index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("duplicate key in {index}: {key}")]
    DuplicateKey { index: String, key: String },

    #[error("concurrent update in {index}: {key}")]
    ConcurrentUpdate { index: String, key: String },

    #[error("row not found in {index}: {key}")]
    RowNotFound { index: String, key: i64 },

    #[error("table {0} not found")]
    TableNotFound(u32),

    #[error("{0} is closed")]
    Closed(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Txn(TxnError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IndexError {
    /// Returns true if retrying the statement in a new transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::ConcurrentUpdate { .. } => true,
            IndexError::Txn(e) => matches!(
                e,
                TxnError::LockTimeout { .. } | TxnError::Deadlock { .. } | TxnError::WriteConflict { .. }
            ),
            _ => false,
        }
    }

    /// Returns true if the error came from cancelling a lock wait.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Txn(TxnError::Cancelled(_)))
    }
}

impl From<TxnError> for IndexError {
    fn from(e: TxnError) -> Self {
        match e {
            TxnError::Storage(e) => IndexError::Storage(e),
            TxnError::MapClosed(map) => IndexError::Closed(format!("map {map}")),
            TxnError::StoreClosed => IndexError::Closed("transaction store".to_string()),
            other => IndexError::Txn(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use crate::txn::TxnId;
    use std::time::Duration;

    #[test]
    fn test_retryable() {
        let concurrent = IndexError::ConcurrentUpdate {
            index: "T_DATA".to_string(),
            key: "1".to_string(),
        };
        assert!(concurrent.is_retryable());

        let timeout = IndexError::from(TxnError::LockTimeout {
            key: Value::Long(1),
            blocker: TxnId(1),
            waited: Duration::from_millis(5),
        });
        assert!(timeout.is_retryable());

        let deadlock = IndexError::from(TxnError::Deadlock {
            waiter: TxnId(1),
            blocker: TxnId(2),
        });
        assert!(deadlock.is_retryable());

        let duplicate = IndexError::DuplicateKey {
            index: "T_DATA".to_string(),
            key: "1".to_string(),
        };
        assert!(!duplicate.is_retryable());
        assert!(!IndexError::Internal("bad key".to_string()).is_retryable());
    }

    #[test]
    fn test_from_txn_error() {
        let cancelled = IndexError::from(TxnError::Cancelled(TxnId(3)));
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retryable());

        let closed = IndexError::from(TxnError::MapClosed("table.1".to_string()));
        assert!(matches!(closed, IndexError::Closed(_)));
    }
}
