//! Scoped lock acquisitions.

use super::table::LockKey;
use super::LockManager;
use crate::error::ProbeResult;
use tracing::warn;

/// A held lock on one (resource, node) pair.
///
/// The lock is released when the guard is dropped. Use
/// [`LockGuard::release`] to observe release errors.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    manager: LockManager,
    key: LockKey,
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(manager: LockManager, key: LockKey) -> Self {
        Self {
            manager,
            key,
            released: false,
        }
    }

    /// Returns the locked key.
    #[must_use]
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Returns the holder identity.
    #[must_use]
    pub fn holder(&self) -> &str {
        self.manager.owner()
    }

    /// Returns true if the lock is still present, unexpired and ours.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn still_held(&self) -> ProbeResult<bool> {
        self.manager.key_held(&self.key)
    }

    /// Releases the lock now.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn release(mut self) -> ProbeResult<()> {
        self.released = true;
        self.manager.release_key(&self.key)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.manager.release_key(&self.key) {
                warn!(key = %self.key, holder = self.manager.owner(), error = %e, "failed to release lock on drop");
            }
        }
    }
}

/// A set of locks acquired together by [`LockManager::lock_all`].
#[derive(Debug)]
#[must_use = "the locks are released as soon as the guard is dropped"]
pub struct MultiLockGuard {
    manager: LockManager,
    keys: Vec<LockKey>,
    released: bool,
}

impl MultiLockGuard {
    pub(crate) fn new(manager: LockManager, keys: Vec<LockKey>) -> Self {
        Self {
            manager,
            keys,
            released: false,
        }
    }

    /// Returns the locked keys in acquisition order.
    #[must_use]
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    /// Returns true if every lock is still held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock table fails.
    pub fn still_held(&self) -> ProbeResult<bool> {
        for key in &self.keys {
            if !self.manager.key_held(key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Releases every lock now, in reverse acquisition order.
    ///
    /// # Errors
    ///
    /// Returns the first release error after attempting every key.
    pub fn release(mut self) -> ProbeResult<()> {
        self.released = true;
        self.manager.release_keys(&self.keys)
    }
}

impl Drop for MultiLockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.manager.release_keys(&self.keys) {
                warn!(holder = self.manager.owner(), error = %e, "failed to release locks on drop");
            }
        }
    }
}
