//! Fault injection for lock tables.
//!
//! [`FaultyLockTable`] wraps a real table and fails chosen calls, so tests can
//! check that multi-node acquisition never leaves partial state behind.

use serialprobe_core::{LockEntry, LockKey, LockTable, MemoryLockTable, ProbeError, ProbeResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Which calls to fail. Call numbers are 1-based and counted per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail this `insert_if_absent` call.
    pub insert: Option<usize>,
    /// Fail this `delete_if_owned` call.
    pub delete: Option<usize>,
    /// Fail this `read` call.
    pub read: Option<usize>,
}

impl FaultPlan {
    /// A plan that never fails.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Fails the `n`th insert.
    #[must_use]
    pub fn fail_insert(mut self, n: usize) -> Self {
        self.insert = Some(n);
        self
    }

    /// Fails the `n`th delete.
    #[must_use]
    pub fn fail_delete(mut self, n: usize) -> Self {
        self.delete = Some(n);
        self
    }

    /// Fails the `n`th read.
    #[must_use]
    pub fn fail_read(mut self, n: usize) -> Self {
        self.read = Some(n);
        self
    }
}

/// A lock table that fails according to a [`FaultPlan`].
pub struct FaultyLockTable {
    inner: Arc<dyn LockTable>,
    plan: FaultPlan,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
    reads: AtomicUsize,
    forget: AtomicBool,
}

impl FaultyLockTable {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn LockTable>, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan,
            inserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            forget: AtomicBool::new(false),
        }
    }

    /// Wraps a fresh [`MemoryLockTable`].
    pub fn in_memory(plan: FaultPlan) -> Self {
        Self::new(Arc::new(MemoryLockTable::new()), plan)
    }

    /// Makes reads report every lock as absent, as if entries were evicted.
    pub fn set_forgetful(&self, forget: bool) {
        self.forget.store(forget, Ordering::SeqCst);
    }

    /// Returns how many inserts were attempted.
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Returns the wrapped table.
    pub fn inner(&self) -> &Arc<dyn LockTable> {
        &self.inner
    }

    fn check(counter: &AtomicUsize, fail_on: Option<usize>, op: &str) -> ProbeResult<()> {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if fail_on == Some(call) {
            return Err(ProbeError::lock_table(format!("injected {op} failure on call {call}")));
        }
        Ok(())
    }
}

impl LockTable for FaultyLockTable {
    fn insert_if_absent(&self, key: &LockKey, entry: LockEntry, now_ms: u64) -> ProbeResult<bool> {
        Self::check(&self.inserts, self.plan.insert, "insert")?;
        self.inner.insert_if_absent(key, entry, now_ms)
    }

    fn delete_if_owned(&self, key: &LockKey, holder: &str) -> ProbeResult<bool> {
        Self::check(&self.deletes, self.plan.delete, "delete")?;
        self.inner.delete_if_owned(key, holder)
    }

    fn read(&self, key: &LockKey) -> ProbeResult<Option<LockEntry>> {
        Self::check(&self.reads, self.plan.read, "read")?;
        if self.forget.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.read(key)
    }

    fn delete_all_owned(&self, holder: &str) -> ProbeResult<Vec<LockKey>> {
        self.inner.delete_all_owned(holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialprobe_core::Resource;
    use serialprobe_store::NodeId;

    fn key(node: u32) -> LockKey {
        LockKey::new(&Resource::trans(60), NodeId::new(node))
    }

    #[test]
    fn fails_only_the_planned_call() {
        let table = FaultyLockTable::in_memory(FaultPlan::none().fail_insert(2));
        let entry = || LockEntry::new("a", 0, std::time::Duration::from_secs(60));
        assert!(table.insert_if_absent(&key(1), entry(), 0).unwrap());
        assert!(table.insert_if_absent(&key(2), entry(), 0).is_err());
        assert!(table.insert_if_absent(&key(2), entry(), 0).unwrap());
        assert_eq!(table.inserts(), 3);
    }

    #[test]
    fn forgetful_reads_hide_entries() {
        let table = FaultyLockTable::in_memory(FaultPlan::none());
        let entry = LockEntry::new("a", 0, std::time::Duration::from_secs(60));
        table.insert_if_absent(&key(1), entry, 0).unwrap();
        table.set_forgetful(true);
        assert!(table.read(&key(1)).unwrap().is_none());
        assert!(table.inner().read(&key(1)).unwrap().is_some());
    }
}
