//! File-backed lock table shared between processes.
//!
//! ```text
//! <path>            # JSON: { "locks": [ { "key": ..., "entry": ... } ] }
//! ```
//!
//! Every operation opens the file, takes an exclusive advisory lock for the
//! read-modify-write, and releases it before returning. Separately-invoked
//! harness processes pointing at the same path therefore see one table.

use super::table::{LockEntry, LockKey, LockTable};
use crate::error::{ProbeError, ProbeResult};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LockFile {
    locks: Vec<LockRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    key: LockKey,
    entry: LockEntry,
}

impl LockFile {
    fn position(&self, key: &LockKey) -> Option<usize> {
        self.locks.iter().position(|r| &r.key == key)
    }
}

/// A lock table stored in a JSON file.
#[derive(Debug, Clone)]
pub struct FileLockTable {
    path: PathBuf,
}

impl FileLockTable {
    /// Uses the table at `path`, creating the file on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory does not exist.
    pub fn open(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(ProbeError::lock_table(format!(
                    "lock table directory {} does not exist",
                    parent.display()
                )));
            }
        }
        Ok(Self { path })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on the decoded table under an exclusive file lock, writing
    /// the table back if `f` reports a change.
    fn with_table<T>(&self, f: impl FnOnce(&mut LockFile) -> (T, bool)) -> ProbeResult<T> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let result = Self::update(&mut file, f);
        let unlocked = FileExt::unlock(&file);
        let value = result?;
        unlocked?;
        Ok(value)
    }

    fn update<T>(file: &mut File, f: impl FnOnce(&mut LockFile) -> (T, bool)) -> ProbeResult<T> {
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let mut table = if text.trim().is_empty() {
            LockFile::default()
        } else {
            serde_json::from_str(&text).map_err(|e| {
                ProbeError::lock_table(format!("corrupt lock table: {e}"))
            })?
        };

        let (value, changed) = f(&mut table);
        if changed {
            let bytes = serde_json::to_vec_pretty(&table)?;
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&bytes)?;
            file.sync_data()?;
        }
        Ok(value)
    }
}

impl LockTable for FileLockTable {
    fn insert_if_absent(&self, key: &LockKey, entry: LockEntry, now_ms: u64) -> ProbeResult<bool> {
        self.with_table(|table| match table.position(key) {
            Some(i) if !table.locks[i].entry.is_expired(now_ms) => (false, false),
            Some(i) => {
                table.locks[i].entry = entry;
                (true, true)
            }
            None => {
                table.locks.push(LockRecord {
                    key: key.clone(),
                    entry,
                });
                (true, true)
            }
        })
    }

    fn delete_if_owned(&self, key: &LockKey, holder: &str) -> ProbeResult<bool> {
        self.with_table(|table| match table.position(key) {
            Some(i) if table.locks[i].entry.holder == holder => {
                table.locks.swap_remove(i);
                (true, true)
            }
            _ => (false, false),
        })
    }

    fn read(&self, key: &LockKey) -> ProbeResult<Option<LockEntry>> {
        self.with_table(|table| {
            let entry = table.position(key).map(|i| table.locks[i].entry.clone());
            (entry, false)
        })
    }

    fn delete_all_owned(&self, holder: &str) -> ProbeResult<Vec<LockKey>> {
        self.with_table(|table| {
            let (owned, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut table.locks)
                .into_iter()
                .partition(|r| r.entry.holder == holder);
            table.locks = kept;
            let changed = !owned.is_empty();
            (owned.into_iter().map(|r| r.key).collect(), changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resource;
    use serialprobe_store::NodeId;
    use std::time::Duration;
    use tempfile::tempdir;

    fn key(node: u32) -> LockKey {
        LockKey::new(&Resource::trans(60), NodeId::new(node))
    }

    #[test]
    fn entries_persist_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");
        let a = FileLockTable::open(&path).unwrap();
        let b = FileLockTable::open(&path).unwrap();

        let entry = LockEntry::new("proc-a", 0, Duration::from_secs(60));
        assert!(a.insert_if_absent(&key(1), entry, 0).unwrap());

        let other = LockEntry::new("proc-b", 10, Duration::from_secs(60));
        assert!(!b.insert_if_absent(&key(1), other, 10).unwrap());
        assert_eq!(b.read(&key(1)).unwrap().unwrap().holder, "proc-a");
    }

    #[test]
    fn delete_and_sweep() {
        let dir = tempdir().unwrap();
        let table = FileLockTable::open(dir.path().join("locks.json")).unwrap();
        for node in 1..=3 {
            let entry = LockEntry::new("sweeper", 0, Duration::from_secs(60));
            table.insert_if_absent(&key(node), entry, 0).unwrap();
        }

        assert!(!table.delete_if_owned(&key(1), "someone-else").unwrap());
        assert!(table.delete_if_owned(&key(1), "sweeper").unwrap());

        let mut swept = table.delete_all_owned("sweeper").unwrap();
        swept.sort();
        assert_eq!(swept, vec![key(2), key(3)]);
        assert!(table.read(&key(2)).unwrap().is_none());
    }

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let result = FileLockTable::open(dir.path().join("nope").join("locks.json"));
        assert!(matches!(result, Err(ProbeError::LockTable { .. })));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.json");
        std::fs::write(&path, "not json").unwrap();
        let table = FileLockTable::open(&path).unwrap();
        assert!(matches!(
            table.read(&key(1)),
            Err(ProbeError::LockTable { .. })
        ));
    }
}
