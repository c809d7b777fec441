// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction error types.

use std::time::Duration;

use crate::storage::{StorageError, Value};

use super::{TxnId, TxnState};

/// Errors that can occur in transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error("write conflict at key {key}: owned by txn {owner}")]
    WriteConflict { key: Value, owner: TxnId },

    #[error("duplicate key {key}")]
    DuplicateKey { key: Value },

    #[error("lock timeout at key {key} after {waited:?}: held by txn {blocker}")]
    LockTimeout {
        key: Value,
        blocker: TxnId,
        waited: Duration,
    },

    #[error("transaction {0} cancelled")]
    Cancelled(TxnId),

    #[error("deadlock: txn {waiter} waits for txn {blocker}")]
    Deadlock { waiter: TxnId, blocker: TxnId },

    #[error("transaction {id} is {state}")]
    NotOpen { id: TxnId, state: TxnState },

    #[error("map {0} is closed")]
    MapClosed(String),

    #[error("transaction store is closed")]
    StoreClosed,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
