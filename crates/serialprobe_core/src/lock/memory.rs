//! Process-local lock table.

use super::table::{LockEntry, LockKey, LockTable};
use crate::error::ProbeResult;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A lock table held in process memory.
///
/// Visible only to managers sharing this instance.
#[derive(Debug, Default)]
pub struct MemoryLockTable {
    entries: Mutex<HashMap<LockKey, LockEntry>>,
}

impl MemoryLockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the table stores no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LockTable for MemoryLockTable {
    fn insert_if_absent(&self, key: &LockKey, entry: LockEntry, now_ms: u64) -> ProbeResult<bool> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(existing) if !existing.is_expired(now_ms) => Ok(false),
            _ => {
                entries.insert(key.clone(), entry);
                Ok(true)
            }
        }
    }

    fn delete_if_owned(&self, key: &LockKey, holder: &str) -> ProbeResult<bool> {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.holder == holder) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn read(&self, key: &LockKey) -> ProbeResult<Option<LockEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete_all_owned(&self, holder: &str) -> ProbeResult<Vec<LockKey>> {
        let mut entries = self.entries.lock();
        let owned: Vec<LockKey> = entries
            .iter()
            .filter(|(_, e)| e.holder == holder)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}
