//! Lock table storage surface.

use crate::error::ProbeResult;
use crate::types::Resource;
use serde::{Deserialize, Serialize};
use serialprobe_store::NodeId;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Compound lock key: one resource on one node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// Resource lock name.
    pub resource: String,
    /// Node the resource lives on.
    pub node: NodeId,
}

impl LockKey {
    /// Creates the key for `resource` on `node`.
    #[must_use]
    pub fn new(resource: &Resource, node: NodeId) -> Self {
        Self {
            resource: resource.name().to_string(),
            node,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource, self.node)
    }
}

/// A live lock grant.
///
/// Times are wall-clock milliseconds since the Unix epoch so an entry means
/// the same thing to every process sharing the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Holder identity.
    pub holder: String,
    /// When the lock was granted.
    pub acquired_at_ms: u64,
    /// When the lease runs out.
    pub expires_at_ms: u64,
}

impl LockEntry {
    /// Creates an entry granted at `now_ms` for `lease`.
    pub fn new(holder: impl Into<String>, now_ms: u64, lease: Duration) -> Self {
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);
        Self {
            holder: holder.into(),
            acquired_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(lease_ms),
        }
    }

    /// Returns true once the lease has run out.
    #[must_use]
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Returns true if `holder` owns this entry and it has not expired.
    #[must_use]
    pub fn is_held_by(&self, holder: &str, now_ms: u64) -> bool {
        self.holder == holder && !self.is_expired(now_ms)
    }
}

/// Storage for lock entries.
///
/// Every method must be atomic with respect to every other caller of the same
/// table, including callers in other processes for shared backends. The
/// table never blocks waiting for a key; polling lives in
/// [`super::LockManager`].
///
/// # Implementors
///
/// - [`super::MemoryLockTable`] - process-local map
/// - [`super::FileLockTable`] - JSON file shared between processes
pub trait LockTable: Send + Sync {
    /// Stores `entry` under `key` unless a live entry is present.
    ///
    /// Expired entries are replaced. Returns true if the entry was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn insert_if_absent(&self, key: &LockKey, entry: LockEntry, now_ms: u64) -> ProbeResult<bool>;

    /// Removes the entry under `key` if `holder` owns it.
    ///
    /// Returns true if an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete_if_owned(&self, key: &LockKey, holder: &str) -> ProbeResult<bool>;

    /// Reads the entry under `key`, expired or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn read(&self, key: &LockKey) -> ProbeResult<Option<LockEntry>>;

    /// Removes every entry owned by `holder` and returns their keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete_all_owned(&self, holder: &str) -> ProbeResult<Vec<LockKey>>;
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
