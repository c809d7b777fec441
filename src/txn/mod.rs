// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Multi-version transactions over shared ordered maps.
//!
//! This module provides transactions with:
//! - Snapshot and read-committed isolation over versioned map entries
//! - Row-level write ownership with blocking waits, lock timeouts,
//!   cancellation and deadlock detection
//! - Undo-log rollback, savepoints and two-phase prepare
//!
//! # Key Concepts
//!
//! ## Write Ownership
//!
//! A write installs an uncommitted version owned by the writing transaction
//! directly in the shared map. At most one transaction owns a key at a time;
//! a second writer waits until the owner commits or rolls back, or fails once
//! its lock timeout passes. Readers never wait: they skip versions owned by
//! other transactions.
//!
//! ## Commit Visibility
//!
//! The store keeps a global commit version. A transaction's snapshot is the
//! commit version current when it began, and commit publishes all of its
//! writes at once by bumping that version under the registry lock.
//!
//! # Example
//!
//! ```no_run
//! use mvtable::storage::Value;
//! use mvtable::txn::TransactionStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TransactionStore::in_memory();
//!
//! let txn = store.begin()?;
//! let accounts = txn.open_map("accounts")?;
//! let balance = accounts.get(&Value::from("alice"))?.and_then(|v| v.to_long()).unwrap_or(0);
//! accounts.put(Value::from("alice"), Value::Long(balance + 10))?;
//! let version = txn.commit()?;
//! println!("Committed at version {version}");
//! # Ok(())
//! # }
//! ```

mod error;
mod map;
mod registry;
mod store;
mod transaction;
mod wait;

pub use error::TxnError;
pub use map::{EntryIter, TransactionMap};
pub use store::TransactionStore;
pub use transaction::{IsolationLevel, Savepoint, Transaction, TxnId, TxnState};
pub use wait::CancelHandle;
