//! Distributed lock manager.
//!
//! Grants mutual exclusion over a (resource, node) pair, and atomically over a
//! set of nodes, to one holder identity at a time. Nodes cannot see each
//! other's row locks, so writers that touch the same logical record on
//! different nodes coordinate here instead.
//!
//! ## Lock lifecycle
//!
//! ```text
//! acquire ──► held ──► release
//!               │
//!               └─ lease runs out ──► expired (counts as absent)
//! ```
//!
//! - Acquisition polls the table until the key is free or the deadline passes.
//!   A timeout is an ordinary `Ok(false)`; only table failures are errors.
//! - Locks are not re-entrant. A holder asking for a key it already holds
//!   waits like anyone else.
//! - Release is idempotent and never removes another holder's entry.
//! - Multi-node acquisition sorts and deduplicates the nodes, then acquires in
//!   ascending order against one deadline. Any failure releases everything
//!   taken by that call.

#[cfg(feature = "std")]
mod file;
mod guard;
mod memory;
mod table;

#[cfg(feature = "std")]
pub use file::FileLockTable;
pub use guard::{LockGuard, MultiLockGuard};
pub use memory::MemoryLockTable;
pub use table::{now_ms, LockEntry, LockKey, LockTable};

use crate::error::ProbeResult;
use crate::stats::LockStats;
use crate::types::Resource;
use serialprobe_store::NodeId;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lease and polling settings shared by a manager family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long a grant stays valid.
    pub lease: Duration,
    /// Delay between acquisition attempts.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl LockOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lease.
    #[must_use]
    pub const fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Lock manager bound to one holder identity.
///
/// Cloning is cheap; clones and managers derived with
/// [`LockManager::with_owner`] share the table, options and statistics.
#[derive(Clone)]
pub struct LockManager {
    table: Arc<dyn LockTable>,
    owner: String,
    options: LockOptions,
    stats: Arc<LockStats>,
}

impl LockManager {
    /// Creates a manager over `table` for `owner`.
    pub fn new(table: Arc<dyn LockTable>, owner: impl Into<String>, options: LockOptions) -> Self {
        Self {
            table,
            owner: owner.into(),
            options,
            stats: Arc::new(LockStats::new()),
        }
    }

    /// Creates a manager over a fresh process-local table.
    pub fn in_memory(owner: impl Into<String>, options: LockOptions) -> Self {
        Self::new(Arc::new(MemoryLockTable::new()), owner, options)
    }

    /// Generates a unique holder identity, e.g. for one process.
    #[must_use]
    pub fn unique_owner(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4())
    }

    /// Derives a manager with a different holder identity over the same
    /// table, options and statistics.
    #[must_use]
    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            table: Arc::clone(&self.table),
            owner: owner.into(),
            options: self.options,
            stats: Arc::clone(&self.stats),
        }
    }

    /// Returns the holder identity.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the lease and polling settings.
    #[must_use]
    pub const fn options(&self) -> LockOptions {
        self.options
    }

    /// Returns the shared statistics.
    #[must_use]
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Acquires the lock on `resource` at `node`, waiting up to `timeout`.
    ///
    /// Returns `Ok(false)` if the lock was still taken at the deadline.
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock table fails.
    pub fn acquire(&self, resource: &Resource, node: NodeId, timeout: Duration) -> ProbeResult<bool> {
        let key = LockKey::new(resource, node);
        self.acquire_until(&key, Instant::now() + timeout)
    }

    /// Releases the lock on `resource` at `node` if this holder owns it.
    ///
    /// Releasing an absent lock, or one held by someone else, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn release(&self, resource: &Resource, node: NodeId) -> ProbeResult<()> {
        self.release_key(&LockKey::new(resource, node))
    }

    /// Returns true if the lock is present, unexpired and held by this holder.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn still_held(&self, resource: &Resource, node: NodeId) -> ProbeResult<bool> {
        self.key_held(&LockKey::new(resource, node))
    }

    /// Acquires `resource` on every node in `nodes`, or on none.
    ///
    /// Nodes are deduplicated and taken in ascending order against a single
    /// deadline. On timeout or table failure every lock taken by this call is
    /// released before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails; no locks remain held.
    pub fn acquire_all(&self, resource: &Resource, nodes: &[NodeId], timeout: Duration) -> ProbeResult<bool> {
        Ok(self.acquire_keys(resource, nodes, timeout)?.is_some())
    }

    /// Releases `resource` on every node in `nodes`.
    ///
    /// Absent locks are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first table error after attempting every node.
    pub fn release_all(&self, resource: &Resource, nodes: &[NodeId]) -> ProbeResult<()> {
        let keys: Vec<LockKey> = nodes.iter().map(|&n| LockKey::new(resource, n)).collect();
        self.release_keys(&keys)
    }

    /// Removes every lock held by this holder. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn release_everything_owned(&self) -> ProbeResult<usize> {
        let keys = self.table.delete_all_owned(&self.owner)?;
        if !keys.is_empty() {
            self.stats.record_swept(keys.len() as u64);
            for key in &keys {
                debug!(key = %key, holder = %self.owner, "swept lock");
            }
        }
        Ok(keys.len())
    }

    /// Acquires one lock and wraps it in a guard.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn lock(&self, resource: &Resource, node: NodeId, timeout: Duration) -> ProbeResult<Option<LockGuard>> {
        let key = LockKey::new(resource, node);
        if self.acquire_until(&key, Instant::now() + timeout)? {
            Ok(Some(LockGuard::new(self.clone(), key)))
        } else {
            Ok(None)
        }
    }

    /// Acquires locks on every node like [`LockManager::acquire_all`] and
    /// wraps them in a guard.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails; no locks remain held.
    pub fn lock_all(
        &self,
        resource: &Resource,
        nodes: &[NodeId],
        timeout: Duration,
    ) -> ProbeResult<Option<MultiLockGuard>> {
        Ok(self
            .acquire_keys(resource, nodes, timeout)?
            .map(|keys| MultiLockGuard::new(self.clone(), keys)))
    }

    fn acquire_keys(
        &self,
        resource: &Resource,
        nodes: &[NodeId],
        timeout: Duration,
    ) -> ProbeResult<Option<Vec<LockKey>>> {
        let mut ordered = nodes.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let deadline = Instant::now() + timeout;
        let mut taken: Vec<LockKey> = Vec::with_capacity(ordered.len());
        for node in ordered {
            let key = LockKey::new(resource, node);
            match self.acquire_until(&key, deadline) {
                Ok(true) => taken.push(key),
                Ok(false) => {
                    self.undo_partial(&taken);
                    return Ok(None);
                }
                Err(e) => {
                    self.undo_partial(&taken);
                    return Err(e);
                }
            }
        }
        Ok(Some(taken))
    }

    fn undo_partial(&self, taken: &[LockKey]) {
        if taken.is_empty() {
            return;
        }
        self.stats.record_rollback();
        debug!(holder = %self.owner, count = taken.len(), "rolling back partial acquisition");
        if let Err(e) = self.release_keys(taken) {
            warn!(holder = %self.owner, error = %e, "failed to roll back partial acquisition");
        }
    }

    fn acquire_until(&self, key: &LockKey, deadline: Instant) -> ProbeResult<bool> {
        loop {
            let now = now_ms();
            let entry = LockEntry::new(self.owner.as_str(), now, self.options.lease);
            if self.table.insert_if_absent(key, entry, now)? {
                self.stats.record_acquired();
                debug!(key = %key, holder = %self.owner, "lock acquired");
                return Ok(true);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.stats.record_timeout();
                debug!(key = %key, holder = %self.owner, "lock acquisition timed out");
                return Ok(false);
            }
            thread::sleep(self.options.poll_interval.min(remaining));
        }
    }

    pub(crate) fn key_held(&self, key: &LockKey) -> ProbeResult<bool> {
        Ok(self
            .table
            .read(key)?
            .is_some_and(|entry| entry.is_held_by(&self.owner, now_ms())))
    }

    pub(crate) fn release_key(&self, key: &LockKey) -> ProbeResult<()> {
        if self.table.delete_if_owned(key, &self.owner)? {
            self.stats.record_released();
            debug!(key = %key, holder = %self.owner, "lock released");
        }
        Ok(())
    }

    /// Releases in reverse order; returns the first error after trying all.
    pub(crate) fn release_keys(&self, keys: &[LockKey]) -> ProbeResult<()> {
        let mut first_error = None;
        for key in keys.iter().rev() {
            if let Err(e) = self.release_key(key) {
                warn!(key = %key, holder = %self.owner, error = %e, "lock release failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("owner", &self.owner)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
