//! Row locks and the wait-for graph used for deadlock detection.
//!
//! ```text
//!          │ S  │ X  │
//! ─────────┼────┼────┤
//!     S    │ ✓  │ ✗  │
//!     X    │ ✗  │ ✗  │
//! ```
//!
//! A transaction never conflicts with itself, so S → X upgrades only wait for
//! other shared holders.

use super::TxnId;
use crate::types::RowId;
use std::collections::{HashMap, HashSet};

/// Row lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct RowLock {
    exclusive: Option<TxnId>,
    shared: HashSet<TxnId>,
}

impl RowLock {
    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

/// Row locks of one node plus waiter → holder edges.
#[derive(Debug, Default)]
pub(crate) struct RowLockTable {
    rows: HashMap<RowId, RowLock>,
    waits_for: HashMap<TxnId, HashSet<TxnId>>,
}

impl RowLockTable {
    /// Returns the transactions that prevent `txn` from taking `mode` on `row`.
    pub(crate) fn blockers(&self, row: RowId, txn: TxnId, mode: LockMode) -> HashSet<TxnId> {
        let Some(lock) = self.rows.get(&row) else {
            return HashSet::new();
        };
        let mut blockers = HashSet::new();
        if let Some(holder) = lock.exclusive {
            if holder != txn {
                blockers.insert(holder);
            }
        }
        if mode == LockMode::Exclusive {
            blockers.extend(lock.shared.iter().copied().filter(|&t| t != txn));
        }
        blockers
    }

    pub(crate) fn grant(&mut self, row: RowId, txn: TxnId, mode: LockMode) {
        let lock = self.rows.entry(row).or_default();
        match mode {
            LockMode::Shared => {
                if lock.exclusive != Some(txn) {
                    lock.shared.insert(txn);
                }
            }
            LockMode::Exclusive => {
                lock.exclusive = Some(txn);
                lock.shared.remove(&txn);
            }
        }
    }

    pub(crate) fn set_waiting(&mut self, txn: TxnId, holders: HashSet<TxnId>) {
        self.waits_for.insert(txn, holders);
    }

    pub(crate) fn clear_waiting(&mut self, txn: TxnId) {
        self.waits_for.remove(&txn);
    }

    /// Returns true if following wait-for edges from `txn` leads back to it.
    pub(crate) fn would_deadlock(&self, txn: TxnId) -> bool {
        let mut stack: Vec<TxnId> = self
            .waits_for
            .get(&txn)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == txn {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.waits_for.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Releases every lock held by `txn` and forgets its wait edges.
    pub(crate) fn release_all(&mut self, txn: TxnId) {
        self.rows.retain(|_, lock| {
            if lock.exclusive == Some(txn) {
                lock.exclusive = None;
            }
            lock.shared.remove(&txn);
            !lock.is_free()
        });
        self.waits_for.remove(&txn);
    }

    #[cfg(test)]
    pub(crate) fn holds(&self, row: RowId, txn: TxnId, mode: LockMode) -> bool {
        self.rows.get(&row).is_some_and(|lock| match mode {
            LockMode::Shared => lock.shared.contains(&txn) || lock.exclusive == Some(txn),
            LockMode::Exclusive => lock.exclusive == Some(txn),
        })
    }
}
