//! Worker specifications, outcomes and the per-Worker protocol.

use crate::config::{millis, HarnessConfig};
use crate::error::ProbeError;
use crate::lock::{LockGuard, LockManager};
use crate::report::{ReportSink, Step, StepRecord};
use crate::types::Resource;
use serde::{Deserialize, Serialize};
use serialprobe_store::{
    Cluster, IsolationLevel, NodeId, Statement, StoreError, StoreErrorKind, StoreTransaction,
};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What a Worker does to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Read twice with a dwell in between.
    Read,
    /// Set the amount.
    Update {
        /// New amount.
        amount: f64,
    },
    /// Delete the row.
    Delete,
}

impl Operation {
    /// Returns true for updates and deletes.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(self, Operation::Read)
    }

    /// Returns true for updates.
    #[must_use]
    pub const fn is_update(&self) -> bool {
        matches!(self, Operation::Update { .. })
    }

    /// Short name for reports.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Operation::Read => "READ",
            Operation::Update { .. } => "WRITE",
            Operation::Delete => "DELETE",
        }
    }
}

/// One Worker of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker identity, unique within a run.
    pub name: String,
    /// Node the Worker targets.
    pub node: NodeId,
    /// What the Worker does.
    pub operation: Operation,
}

impl WorkerSpec {
    /// Creates an update Worker.
    pub fn update(name: impl Into<String>, node: NodeId, amount: f64) -> Self {
        Self {
            name: name.into(),
            node,
            operation: Operation::Update { amount },
        }
    }

    /// Creates a delete Worker.
    pub fn delete(name: impl Into<String>, node: NodeId) -> Self {
        Self {
            name: name.into(),
            node,
            operation: Operation::Delete,
        }
    }

    /// Creates a read Worker.
    pub fn read(name: impl Into<String>, node: NodeId) -> Self {
        Self {
            name: name.into(),
            node,
            operation: Operation::Read,
        }
    }
}

/// Why a Worker failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// The DLM lock was not acquired in time.
    #[serde(rename = "LOCK_ACQUIRE_TIMEOUT")]
    DistributedLockTimeout,
    /// The DLM lock vanished or expired before the mutation.
    #[serde(rename = "LOST_LOCK")]
    LostLock,
    /// The engine reported a lock-wait timeout or deadlock.
    #[serde(rename = "NATIVE_LOCK_CONTENTION")]
    LockContention,
    /// The row does not exist on the target node.
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound,
    /// Anything else.
    #[serde(rename = "OTHER")]
    Other,
}

impl FailureCategory {
    /// All categories in report order.
    pub const ALL: [FailureCategory; 5] = [
        FailureCategory::DistributedLockTimeout,
        FailureCategory::LostLock,
        FailureCategory::LockContention,
        FailureCategory::ResourceNotFound,
        FailureCategory::Other,
    ];

    /// Returns the report code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            FailureCategory::DistributedLockTimeout => "LOCK_ACQUIRE_TIMEOUT",
            FailureCategory::LostLock => "LOST_LOCK",
            FailureCategory::LockContention => "NATIVE_LOCK_CONTENTION",
            FailureCategory::ResourceNotFound => "RESOURCE_NOT_FOUND",
            FailureCategory::Other => "OTHER",
        }
    }

    /// Maps a native error classification.
    #[must_use]
    pub const fn from_store(kind: StoreErrorKind) -> Self {
        match kind {
            StoreErrorKind::LockWaitTimeout | StoreErrorKind::Deadlock => {
                FailureCategory::LockContention
            }
            StoreErrorKind::NotFound => FailureCategory::ResourceNotFound,
            StoreErrorKind::Other => FailureCategory::Other,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal state of a Worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Committed.
    Success,
    /// Did not commit.
    Failed(FailureCategory),
}

/// What happened to one Worker.
///
/// Times are offsets from the start of the run so outcomes of one run can be
/// ordered against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    /// Worker identity.
    pub worker: String,
    /// Target node.
    pub node: NodeId,
    /// What the Worker did.
    pub operation: Operation,
    /// Isolation level of its transaction.
    pub isolation: IsolationLevel,
    /// When the Worker started.
    #[serde(with = "millis")]
    pub started: Duration,
    /// When the Worker finished.
    #[serde(with = "millis")]
    pub ended: Duration,
    /// Terminal state.
    pub status: WorkerStatus,
    /// Amount observed before mutating (first read for readers).
    pub before: Option<f64>,
    /// Amount observed after mutating (second read for readers).
    pub after: Option<f64>,
    /// Error text for failed Workers.
    pub error: Option<String>,
}

impl WorkerOutcome {
    fn pending(spec: &WorkerSpec, isolation: IsolationLevel, started: Duration) -> Self {
        Self {
            worker: spec.name.clone(),
            node: spec.node,
            operation: spec.operation,
            isolation,
            started,
            ended: started,
            status: WorkerStatus::Failed(FailureCategory::Other),
            before: None,
            after: None,
            error: None,
        }
    }

    /// Builds the outcome of a Worker that never ran, e.g. because its thread
    /// panicked.
    pub(crate) fn aborted(
        spec: &WorkerSpec,
        isolation: IsolationLevel,
        at: Duration,
        message: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::pending(spec, isolation, at);
        outcome.error = Some(message.into());
        outcome
    }

    /// Returns true if the Worker committed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Success
    }

    /// Returns the failure category of a failed Worker.
    #[must_use]
    pub fn failure(&self) -> Option<FailureCategory> {
        match self.status {
            WorkerStatus::Success => None,
            WorkerStatus::Failed(category) => Some(category),
        }
    }

    /// Returns how long the Worker ran.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.ended.saturating_sub(self.started)
    }
}

/// A Worker failure on its way into the outcome.
#[derive(Debug)]
struct Failure {
    category: FailureCategory,
    message: String,
}

impl Failure {
    fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        Self::new(FailureCategory::from_store(err.kind()), err.to_string())
    }
}

impl From<ProbeError> for Failure {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Store(store) => store.into(),
            other => Self::new(FailureCategory::Other, other.to_string()),
        }
    }
}

/// Everything a Worker needs that is shared across a run.
pub(crate) struct WorkerContext<'a> {
    pub(crate) cluster: &'a Cluster,
    pub(crate) resource: &'a Resource,
    pub(crate) isolation: IsolationLevel,
    pub(crate) config: &'a HarnessConfig,
    pub(crate) sink: &'a dyn ReportSink,
    pub(crate) origin: Instant,
}

impl WorkerContext<'_> {
    fn step(&self, spec: &WorkerSpec, step: Step, amount: Option<f64>, detail: Option<String>) {
        self.sink.log_step(&StepRecord {
            worker: spec.name.clone(),
            node: spec.node,
            resource: self.resource.name().to_string(),
            isolation: self.isolation,
            step,
            at: self.origin.elapsed(),
            amount,
            detail,
        });
    }

    fn read(&self, txn: &mut dyn StoreTransaction, locking: bool) -> Result<Option<f64>, Failure> {
        let row = self.resource.row();
        let statement = if locking {
            Statement::select_for_update(row)
        } else {
            Statement::select(row)
        };
        Ok(txn.execute(&statement)?.first_amount())
    }

    /// Runs one Worker to completion. Never panics on expected failures.
    pub(crate) fn execute(&self, locks: &LockManager, spec: &WorkerSpec) -> WorkerOutcome {
        let mut outcome = WorkerOutcome::pending(spec, self.isolation, self.origin.elapsed());
        let result = if spec.operation.is_write() {
            self.execute_write(locks, spec, &mut outcome)
        } else {
            self.in_transaction(spec, |txn| self.read_body(spec, txn, &mut outcome))
        };

        outcome.ended = self.origin.elapsed();
        match result {
            Ok(()) => {
                outcome.status = WorkerStatus::Success;
                debug!(worker = %spec.name, node = %spec.node, before = ?outcome.before, after = ?outcome.after, "worker succeeded");
            }
            Err(failure) => {
                outcome.status = WorkerStatus::Failed(failure.category);
                debug!(worker = %spec.name, node = %spec.node, category = %failure.category, error = %failure.message, "worker failed");
                outcome.error = Some(failure.message);
            }
        }
        outcome
    }

    fn execute_write(
        &self,
        locks: &LockManager,
        spec: &WorkerSpec,
        outcome: &mut WorkerOutcome,
    ) -> Result<(), Failure> {
        let timeout = self.config.lock_timeout;
        let Some(guard) = locks.lock(self.resource, spec.node, timeout)? else {
            self.step(spec, Step::LockDenied, None, None);
            return Err(Failure::new(
                FailureCategory::DistributedLockTimeout,
                format!(
                    "distributed lock on {}@{} not acquired within {timeout:?}",
                    self.resource, spec.node
                ),
            ));
        };
        self.step(spec, Step::LockAcquired, None, Some(guard.holder().to_string()));

        let result = self.in_transaction(spec, |txn| self.write_body(spec, &guard, txn, outcome));

        if let Err(e) = guard.release() {
            warn!(worker = %spec.name, node = %spec.node, error = %e, "failed to release distributed lock");
        }
        self.step(spec, Step::LockReleased, None, None);
        result
    }

    /// Begins a transaction, runs `body`, and commits or rolls back.
    fn in_transaction(
        &self,
        spec: &WorkerSpec,
        body: impl FnOnce(&mut dyn StoreTransaction) -> Result<(), Failure>,
    ) -> Result<(), Failure> {
        let mut txn = self.cluster.begin(spec.node, self.isolation)?;
        self.step(spec, Step::Begin, None, Some(self.isolation.to_string()));

        match body(txn.as_mut()) {
            Ok(()) => {
                txn.commit()?;
                self.step(spec, Step::Commit, None, None);
                Ok(())
            }
            Err(failure) => {
                if let Err(e) = txn.rollback() {
                    debug!(worker = %spec.name, error = %e, "rollback after failure did not apply");
                }
                self.step(spec, Step::Rollback, None, Some(failure.message.clone()));
                Err(failure)
            }
        }
    }

    fn verify_lock(&self, spec: &WorkerSpec, guard: &LockGuard, phase: &str) -> Result<(), Failure> {
        if guard.still_held()? {
            return Ok(());
        }
        warn!(worker = %spec.name, key = %guard.key(), phase, "distributed lock lost");
        self.step(spec, Step::LockLost, None, Some(phase.to_string()));
        Err(Failure::new(
            FailureCategory::LostLock,
            format!("distributed lock on {} lost {phase}", guard.key()),
        ))
    }

    fn write_body(
        &self,
        spec: &WorkerSpec,
        guard: &LockGuard,
        txn: &mut dyn StoreTransaction,
        outcome: &mut WorkerOutcome,
    ) -> Result<(), Failure> {
        self.verify_lock(spec, guard, "before read")?;

        let before = self.read(txn, self.isolation.is_strictest())?;
        self.step(spec, Step::Read, before, None);
        if before.is_none() {
            return Err(self.not_found(spec));
        }
        outcome.before = before;

        self.verify_lock(spec, guard, "before mutation")?;

        let row = self.resource.row();
        let statement = match spec.operation {
            Operation::Update { amount } => Statement::update(row, amount),
            Operation::Delete => Statement::delete(row),
            Operation::Read => return Ok(()),
        };
        if txn.execute(&statement)?.row_count == 0 {
            return Err(self.not_found(spec));
        }
        self.step(spec, Step::Mutate, statement_amount(&statement), None);

        let dwell = self.config.dwell_for(self.isolation);
        self.step(spec, Step::Dwell, None, Some(format!("{dwell:?}")));
        thread::sleep(dwell);

        if spec.operation.is_update() {
            outcome.after = self.read(txn, false)?;
            self.step(spec, Step::ReadBack, outcome.after, None);
        }
        Ok(())
    }

    fn read_body(
        &self,
        spec: &WorkerSpec,
        txn: &mut dyn StoreTransaction,
        outcome: &mut WorkerOutcome,
    ) -> Result<(), Failure> {
        let first = self.read(txn, false)?;
        self.step(spec, Step::Read, first, None);
        if first.is_none() {
            return Err(self.not_found(spec));
        }
        outcome.before = first;

        thread::sleep(self.config.dwell_for(self.isolation));

        outcome.after = self.read(txn, false)?;
        self.step(spec, Step::ReadBack, outcome.after, None);
        Ok(())
    }

    fn not_found(&self, spec: &WorkerSpec) -> Failure {
        Failure::new(
            FailureCategory::ResourceNotFound,
            format!("row {} not found on {}", self.resource.row(), spec.node),
        )
    }
}

fn statement_amount(statement: &Statement) -> Option<f64> {
    match *statement {
        Statement::Update { amount, .. } | Statement::Upsert { amount, .. } => Some(amount),
        Statement::Select { .. } | Statement::Delete { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_categories_from_store_kinds() {
        assert_eq!(
            FailureCategory::from_store(StoreErrorKind::Deadlock),
            FailureCategory::LockContention
        );
        assert_eq!(
            FailureCategory::from_store(StoreErrorKind::LockWaitTimeout),
            FailureCategory::LockContention
        );
        assert_eq!(
            FailureCategory::from_store(StoreErrorKind::NotFound),
            FailureCategory::ResourceNotFound
        );
    }

    #[test]
    fn category_serializes_as_code() {
        let json = serde_json::to_string(&FailureCategory::DistributedLockTimeout).unwrap();
        assert_eq!(json, "\"LOCK_ACQUIRE_TIMEOUT\"");
        for category in FailureCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json.trim_matches('"'), category.code());
        }
    }

    #[test]
    fn operation_kinds() {
        assert!(Operation::Delete.is_write());
        assert!(!Operation::Delete.is_update());
        assert!(!Operation::Read.is_write());
        assert_eq!(Operation::Update { amount: 1.0 }.name(), "WRITE");
    }

    #[test]
    fn outcome_duration_and_failure() {
        let spec = WorkerSpec::update("T1", NodeId::new(1), 12111.11);
        let mut outcome = WorkerOutcome::pending(&spec, IsolationLevel::Serializable, Duration::from_millis(10));
        outcome.ended = Duration::from_millis(35);
        assert_eq!(outcome.duration(), Duration::from_millis(25));
        assert_eq!(outcome.failure(), Some(FailureCategory::Other));
        outcome.status = WorkerStatus::Success;
        assert!(outcome.is_success());
        assert_eq!(outcome.failure(), None);
    }
}
