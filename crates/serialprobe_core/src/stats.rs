//! Lock manager statistics.
//!
//! One [`LockStats`] instance is shared by a manager and every manager derived
//! from it with [`crate::LockManager::with_owner`], so the counters describe
//! the whole family.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock manager counters.
///
/// All counters are atomic and can be read while Workers are running.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Successful acquisitions.
    acquired: AtomicU64,
    /// Acquisitions that gave up at their deadline.
    timed_out: AtomicU64,
    /// Releases that removed an entry.
    released: AtomicU64,
    /// Locks found missing or expired by their holder.
    lost: AtomicU64,
    /// Leftover locks removed by sweeps.
    swept: AtomicU64,
    /// Partial multi-node acquisitions that were rolled back.
    rollbacks: AtomicU64,
}

impl LockStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swept(&self, count: u64) {
        self.swept.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of successful acquisitions.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Returns the number of acquisitions that timed out.
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Returns the number of releases that removed an entry.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Returns the number of locks found lost by their holder.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Returns the number of swept leftover locks.
    pub fn swept(&self) -> u64 {
        self.swept.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled-back partial acquisitions.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            acquired: self.acquired(),
            timed_out: self.timed_out(),
            released: self.released(),
            lost: self.lost(),
            swept: self.swept(),
            rollbacks: self.rollbacks(),
        }
    }
}

/// A point-in-time copy of [`LockStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct LockStatsSnapshot {
    /// Successful acquisitions.
    pub acquired: u64,
    /// Acquisitions that timed out.
    pub timed_out: u64,
    /// Releases that removed an entry.
    pub released: u64,
    /// Locks found lost by their holder.
    pub lost: u64,
    /// Swept leftover locks.
    pub swept: u64,
    /// Rolled-back partial acquisitions.
    pub rollbacks: u64,
}

impl LockStatsSnapshot {
    /// Returns the number of locks currently believed held by the family.
    ///
    /// Lost and swept locks count as gone.
    pub fn outstanding(&self) -> u64 {
        self.acquired
            .saturating_sub(self.released)
            .saturating_sub(self.lost)
            .saturating_sub(self.swept)
    }
}
