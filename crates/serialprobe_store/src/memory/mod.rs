//! In-memory multi-version node engine.
//!
//! [`MemoryNode`] stands in for one database node. It keeps committed row
//! versions tagged with commit sequence numbers and at most one pending write
//! per row, and reproduces the observable behaviour of the four isolation
//! levels:
//!
//! | level | plain `SELECT` | writes / `FOR UPDATE` |
//! |-------|----------------|-----------------------|
//! | READ UNCOMMITTED | latest value, including uncommitted writes | exclusive row lock |
//! | READ COMMITTED | latest committed value | exclusive row lock |
//! | REPEATABLE READ | snapshot pinned at the first read | exclusive row lock, latest value |
//! | SERIALIZABLE | shared row lock, latest committed value | exclusive row lock |
//!
//! Lock waits are bounded by the node's lock-wait timeout. A request that
//! would close a cycle in the wait-for graph fails immediately with
//! [`StoreError::Deadlock`] and the engine rolls the victim back.

mod locks;
mod rows;

use crate::backend::{NodeStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};
use crate::statement::{Statement, StatementOutcome};
use crate::types::{IsolationLevel, NodeId, Row, RowId};
use locks::{LockMode, RowLockTable};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rows::{ReadView, VersionedRow};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default time a statement waits for a row lock.
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(50);

/// Engine-internal transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TxnId(pub(crate) u64);

/// Counters describing what the engine has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryNodeStats {
    /// Transactions started.
    pub begun: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions rolled back, including deadlock victims.
    pub rolled_back: u64,
    /// Lock requests that had to wait.
    pub lock_waits: u64,
    /// Lock requests that gave up.
    pub lock_wait_timeouts: u64,
    /// Deadlocks detected.
    pub deadlocks: u64,
}

#[derive(Debug, Default)]
struct EngineState {
    rows: HashMap<RowId, VersionedRow>,
    locks: RowLockTable,
    committed_seq: u64,
    /// Pinned REPEATABLE READ snapshots and how many transactions hold each.
    snapshots: BTreeMap<u64, usize>,
    next_txn: u64,
    active: usize,
    stats: MemoryNodeStats,
}

impl EngineState {
    fn visible(&self, row: RowId, txn: TxnId, view: ReadView) -> Option<f64> {
        self.rows
            .get(&row)
            .and_then(|versions| versions.visible_to(txn, view))
    }

    fn next_seq(&mut self) -> u64 {
        self.committed_seq += 1;
        self.committed_seq
    }

    fn pin_snapshot(&mut self) -> u64 {
        let seq = self.committed_seq;
        *self.snapshots.entry(seq).or_insert(0) += 1;
        seq
    }

    fn unpin_snapshot(&mut self, seq: u64) {
        if let Entry::Occupied(mut holders) = self.snapshots.entry(seq) {
            *holders.get_mut() -= 1;
            if *holders.get() == 0 {
                holders.remove();
            }
        }
    }

    /// Oldest sequence number an open transaction can still read.
    fn horizon(&self) -> u64 {
        self.snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or(self.committed_seq)
    }
}

#[derive(Debug)]
struct Engine {
    node: NodeId,
    state: Mutex<EngineState>,
    lock_released: Condvar,
    lock_wait_timeout: Duration,
    available: AtomicBool,
}

impl Engine {
    fn lock_row(
        &self,
        state: &mut MutexGuard<'_, EngineState>,
        txn: TxnId,
        row: RowId,
        mode: LockMode,
    ) -> StoreResult<()> {
        let deadline = Instant::now() + self.lock_wait_timeout;
        let mut waited = false;
        loop {
            let blockers = state.locks.blockers(row, txn, mode);
            if blockers.is_empty() {
                state.locks.clear_waiting(txn);
                state.locks.grant(row, txn, mode);
                return Ok(());
            }

            state.locks.set_waiting(txn, blockers);
            if state.locks.would_deadlock(txn) {
                state.locks.clear_waiting(txn);
                state.stats.deadlocks += 1;
                debug!(node = %self.node, row = %row, txn = txn.0, "deadlock detected");
                return Err(StoreError::Deadlock {
                    node: self.node,
                    row,
                });
            }

            if !waited {
                waited = true;
                state.stats.lock_waits += 1;
                debug!(node = %self.node, row = %row, txn = txn.0, ?mode, "waiting for row lock");
            }

            if self.lock_released.wait_until(state, deadline).timed_out()
                && !state.locks.blockers(row, txn, mode).is_empty()
            {
                state.locks.clear_waiting(txn);
                state.stats.lock_wait_timeouts += 1;
                return Err(StoreError::LockWaitTimeout {
                    node: self.node,
                    row,
                });
            }
        }
    }

    /// Publishes or discards the transaction's writes and frees its locks.
    fn finish(&self, txn: TxnId, written: &BTreeSet<RowId>, snapshot: Option<u64>, commit: bool) {
        let mut state = self.state.lock();
        if let Some(seq) = snapshot {
            state.unpin_snapshot(seq);
        }
        if commit && !written.is_empty() {
            let seq = state.next_seq();
            let horizon = state.horizon();
            for row in written {
                if let Some(versions) = state.rows.get_mut(row) {
                    versions.publish(txn, seq);
                    versions.prune(horizon);
                }
            }
        } else {
            for row in written {
                if let Some(versions) = state.rows.get_mut(row) {
                    versions.discard(txn);
                }
            }
        }
        state.locks.release_all(txn);
        state.active = state.active.saturating_sub(1);
        if commit {
            state.stats.committed += 1;
        } else {
            state.stats.rolled_back += 1;
        }
        drop(state);
        self.lock_released.notify_all();
    }
}

/// An in-memory database node.
///
/// Cloning yields another handle to the same node.
#[derive(Debug, Clone)]
pub struct MemoryNode {
    engine: Arc<Engine>,
}

impl MemoryNode {
    /// Creates an empty node with the default lock-wait timeout.
    #[must_use]
    pub fn new(node: NodeId) -> Self {
        Self::with_lock_wait_timeout(node, DEFAULT_LOCK_WAIT_TIMEOUT)
    }

    /// Creates an empty node with a custom lock-wait timeout.
    #[must_use]
    pub fn with_lock_wait_timeout(node: NodeId, lock_wait_timeout: Duration) -> Self {
        Self {
            engine: Arc::new(Engine {
                node,
                state: Mutex::new(EngineState::default()),
                lock_released: Condvar::new(),
                lock_wait_timeout,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Inserts or overwrites a committed row outside any transaction.
    pub fn seed(&self, row: RowId, amount: f64) {
        let mut state = self.engine.state.lock();
        let seq = state.next_seq();
        state
            .rows
            .insert(row, VersionedRow::committed(seq, Some(amount)));
    }

    /// Returns the latest committed amount of a row.
    #[must_use]
    pub fn committed_amount(&self, row: RowId) -> Option<f64> {
        self.engine
            .state
            .lock()
            .rows
            .get(&row)
            .and_then(VersionedRow::latest)
    }

    /// Returns the number of open transactions.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.engine.state.lock().active
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> MemoryNodeStats {
        self.engine.state.lock().stats
    }

    /// Makes the node refuse (or accept again) new transactions.
    pub fn set_available(&self, available: bool) {
        self.engine.available.store(available, Ordering::SeqCst);
    }

    /// Returns the configured lock-wait timeout.
    #[must_use]
    pub fn lock_wait_timeout(&self) -> Duration {
        self.engine.lock_wait_timeout
    }
}

impl NodeStore for MemoryNode {
    fn node_id(&self) -> NodeId {
        self.engine.node
    }

    fn begin(&self, isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTransaction>> {
        if !self.engine.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                node: self.engine.node,
                message: "node is not accepting connections".into(),
            });
        }
        let mut state = self.engine.state.lock();
        state.next_txn += 1;
        let id = TxnId(state.next_txn);
        state.active += 1;
        state.stats.begun += 1;
        drop(state);

        Ok(Box::new(MemoryTransaction {
            engine: Arc::clone(&self.engine),
            id,
            isolation,
            snapshot: None,
            written: BTreeSet::new(),
            state: TxnState::Active,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// A transaction on a [`MemoryNode`].
#[derive(Debug)]
pub struct MemoryTransaction {
    engine: Arc<Engine>,
    id: TxnId,
    isolation: IsolationLevel,
    snapshot: Option<u64>,
    written: BTreeSet<RowId>,
    state: TxnState,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> StoreResult<()> {
        if self.state == TxnState::Active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed {
                node: self.engine.node,
            })
        }
    }

    fn run(&mut self, statement: &Statement) -> StoreResult<(Vec<Row>, u64)> {
        let engine = Arc::clone(&self.engine);
        let mut state = engine.state.lock();
        let txn = self.id;

        match *statement {
            Statement::Select { row, for_update } => {
                let view = if for_update {
                    engine.lock_row(&mut state, txn, row, LockMode::Exclusive)?;
                    ReadView::Latest
                } else {
                    match self.isolation {
                        IsolationLevel::ReadUncommitted => ReadView::Dirty,
                        IsolationLevel::ReadCommitted => ReadView::Latest,
                        IsolationLevel::RepeatableRead => {
                            let seq = match self.snapshot {
                                Some(seq) => seq,
                                None => {
                                    let seq = state.pin_snapshot();
                                    self.snapshot = Some(seq);
                                    seq
                                }
                            };
                            ReadView::Snapshot(seq)
                        }
                        IsolationLevel::Serializable => {
                            engine.lock_row(&mut state, txn, row, LockMode::Shared)?;
                            ReadView::Latest
                        }
                    }
                };
                let rows: Vec<Row> = state
                    .visible(row, txn, view)
                    .map(|amount| Row { id: row, amount })
                    .into_iter()
                    .collect();
                let count = rows.len() as u64;
                Ok((rows, count))
            }
            Statement::Update { row, amount } => {
                engine.lock_row(&mut state, txn, row, LockMode::Exclusive)?;
                if state.visible(row, txn, ReadView::Latest).is_none() {
                    return Ok((Vec::new(), 0));
                }
                state.rows.entry(row).or_default().stage(txn, Some(amount));
                self.written.insert(row);
                Ok((Vec::new(), 1))
            }
            Statement::Delete { row } => {
                engine.lock_row(&mut state, txn, row, LockMode::Exclusive)?;
                if state.visible(row, txn, ReadView::Latest).is_none() {
                    return Ok((Vec::new(), 0));
                }
                state.rows.entry(row).or_default().stage(txn, None);
                self.written.insert(row);
                Ok((Vec::new(), 1))
            }
            Statement::Upsert { row, amount } => {
                engine.lock_row(&mut state, txn, row, LockMode::Exclusive)?;
                state.rows.entry(row).or_default().stage(txn, Some(amount));
                self.written.insert(row);
                Ok((Vec::new(), 1))
            }
        }
    }

    fn close(&mut self, commit: bool) {
        self.state = if commit {
            TxnState::Committed
        } else {
            TxnState::RolledBack
        };
        self.engine.finish(self.id, &self.written, self.snapshot, commit);
    }
}

impl StoreTransaction for MemoryTransaction {
    fn node_id(&self) -> NodeId {
        self.engine.node
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn execute(&mut self, statement: &Statement) -> StoreResult<StatementOutcome> {
        self.ensure_active()?;
        let started = Instant::now();
        match self.run(statement) {
            Ok((rows, row_count)) => Ok(StatementOutcome {
                rows,
                row_count,
                duration: started.elapsed(),
            }),
            Err(err) => {
                if matches!(err, StoreError::Deadlock { .. }) {
                    // Victims lose the whole transaction, not just the statement.
                    self.close(false);
                }
                Err(err)
            }
        }
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.close(true);
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        match self.state {
            TxnState::Active => {
                self.close(false);
                Ok(())
            }
            TxnState::RolledBack => Ok(()),
            TxnState::Committed => Err(StoreError::TransactionClosed {
                node: self.engine.node,
            }),
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            self.close(false);
        }
    }
}
