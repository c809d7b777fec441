// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Blocking waits for row locks held by other transactions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Condition variable shared by every transaction of a store.
///
/// Finishing transactions wake all waiters; each waiter re-checks whether
/// the transaction it waits for is still active.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    lock: Mutex<()>,
    cond: Condvar,
}

impl WaitQueue {
    /// Acquires the queue lock. Waiters must check their wake condition while
    /// holding it so that a wake-up between check and wait is not lost.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Blocks until woken or until `deadline`. Returns true on timeout.
    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, ()>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.cond.wait_until(guard, deadline).timed_out(),
            None => {
                self.cond.wait(guard);
                false
            }
        }
    }

    /// Wakes every waiter.
    pub(crate) fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

/// Interrupts a transaction's lock waits from another thread.
///
/// A cancel that arrives while the transaction is not waiting is kept and
/// consumed by its next wait.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    pub(crate) flag: Arc<AtomicBool>,
    pub(crate) waiters: Arc<WaitQueue>,
}

impl CancelHandle {
    /// Cancels the current (or next) lock wait of the transaction.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.waiters.notify_all();
    }

    /// Returns true if a cancel is pending.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
