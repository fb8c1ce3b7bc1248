//! Timed transaction driver.
//!
//! Runs a set of Workers against one resource, concurrently or sequentially.
//! Each writing Worker follows the same protocol:
//!
//! ```text
//! DLM lock ─► BEGIN ─► verify lock ─► read ─► verify lock ─► mutate
//!     ─► dwell ─► read back ─► COMMIT ─► DLM release
//! ```
//!
//! Any native error rolls the transaction back and is recorded as a classified
//! failure. The DLM lock is released on every path. Read Workers take no DLM
//! lock.
//!
//! After every run the driver captures the final committed state of each
//! targeted node, sweeps leftover Worker locks, and restores the baseline on
//! every node so runs are independent.

mod probe;
mod run;
mod worker;

pub use probe::{ProbeTrace, ReadSample, ReaderTrace, WriterEnding, WriterTrace};
pub use run::{ExecutionMode, ExecutionRun, RunSummary};
pub use worker::{FailureCategory, Operation, WorkerOutcome, WorkerSpec, WorkerStatus};

use crate::config::HarnessConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::lock::{now_ms, LockManager, MemoryLockTable};
use crate::report::{ReportSink, TracingSink};
use crate::types::Resource;
use serialprobe_store::{Cluster, IsolationLevel, NodeId, Statement, StoreResult};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use worker::WorkerContext;

/// Executes Worker sets against a cluster.
#[derive(Clone)]
pub struct Driver {
    cluster: Cluster,
    locks: LockManager,
    config: HarnessConfig,
    sink: Arc<dyn ReportSink>,
}

impl Driver {
    /// Creates a driver using `locks` for distributed locking.
    ///
    /// Worker holder identities are derived from the manager's owner.
    pub fn new(cluster: Cluster, locks: LockManager, config: HarnessConfig) -> Self {
        Self {
            cluster,
            locks,
            config,
            sink: Arc::new(TracingSink),
        }
    }

    /// Creates a driver with a process-local lock table.
    pub fn in_memory(cluster: Cluster, config: HarnessConfig) -> Self {
        let locks = LockManager::new(
            Arc::new(MemoryLockTable::new()),
            config.owner.clone(),
            config.lock_options(),
        );
        Self::new(cluster, locks, config)
    }

    /// Replaces the report sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the cluster.
    #[must_use]
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Returns the lock manager.
    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Returns the report sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn ReportSink> {
        &self.sink
    }

    /// Returns the lock manager a Worker runs under.
    #[must_use]
    pub fn worker_locks(&self, worker: &str) -> LockManager {
        self.locks
            .with_owner(format!("{}/{worker}", self.locks.owner()))
    }

    /// Runs `workers` against `resource` at `isolation`.
    ///
    /// Produces exactly one outcome per Worker, in Worker order. Leftover
    /// Worker locks are swept and the baseline restored on every node even
    /// when some nodes fail; nodes that could not be read or restored are
    /// listed in the returned run.
    ///
    /// # Errors
    ///
    /// Returns an error if the Worker set is invalid for the cluster. Worker
    /// and node failures are recorded in the run, not returned.
    pub fn run(
        &self,
        resource: &Resource,
        workers: &[WorkerSpec],
        isolation: IsolationLevel,
        mode: ExecutionMode,
    ) -> ProbeResult<ExecutionRun> {
        self.validate_workers(workers)?;
        info!(resource = %resource, %isolation, %mode, workers = workers.len(), "run starting");

        let started_at_ms = now_ms();
        let ctx = WorkerContext {
            cluster: &self.cluster,
            resource,
            isolation,
            config: &self.config,
            sink: self.sink.as_ref(),
            origin: Instant::now(),
        };
        let outcomes = match mode {
            ExecutionMode::Concurrent => self.run_concurrent(&ctx, workers),
            ExecutionMode::Sequential => workers
                .iter()
                .map(|spec| ctx.execute(&self.worker_locks(&spec.name), spec))
                .collect(),
        };
        let wall_time = ctx.origin.elapsed();

        let targeted: BTreeSet<NodeId> = workers.iter().map(|w| w.node).collect();
        let (final_states, uncaptured) = self.capture_reachable_states(resource, targeted);
        self.sweep_worker_locks(workers);
        let unrestored = self.restore_baseline_on_nodes(resource);

        let run = ExecutionRun {
            resource: resource.clone(),
            isolation,
            mode,
            started_at_ms,
            wall_time,
            outcomes,
            final_states,
            uncaptured,
            unrestored,
        };
        let summary = run.summary();
        info!(
            resource = %resource,
            %isolation,
            %mode,
            successes = summary.successes,
            failed = summary.failed(),
            wall_ms = summary.wall_time.as_millis() as u64,
            "run finished"
        );
        self.sink.end_run(&run);
        Ok(run)
    }

    fn validate_workers(&self, workers: &[WorkerSpec]) -> ProbeResult<()> {
        let mut names = HashSet::new();
        for spec in workers {
            if !names.insert(spec.name.as_str()) {
                return Err(ProbeError::invalid_workload(format!(
                    "duplicate worker name {}",
                    spec.name
                )));
            }
            if self.cluster.node(spec.node).is_err() {
                return Err(ProbeError::invalid_workload(format!(
                    "worker {} targets unknown node {}",
                    spec.name, spec.node
                )));
            }
        }
        Ok(())
    }

    fn run_concurrent(&self, ctx: &WorkerContext<'_>, workers: &[WorkerSpec]) -> Vec<WorkerOutcome> {
        let (tx, rx) = mpsc::channel();
        let stagger = self.config.stagger;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers.len());
            for (index, spec) in workers.iter().enumerate() {
                if index > 0 && !stagger.is_zero() {
                    thread::sleep(stagger);
                }
                let tx = tx.clone();
                let locks = self.worker_locks(&spec.name);
                let spawned = thread::Builder::new()
                    .name(format!("worker-{}", spec.name))
                    .spawn_scoped(scope, move || {
                        let outcome = ctx.execute(&locks, spec);
                        // The receiver outlives every worker.
                        let _ = tx.send((index, outcome));
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => warn!(worker = %spec.name, error = %e, "failed to spawn worker"),
                }
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!("worker thread panicked");
                }
            }
        });
        drop(tx);

        let mut received: BTreeMap<usize, WorkerOutcome> = rx.into_iter().collect();
        workers
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                received.remove(&index).unwrap_or_else(|| {
                    WorkerOutcome::aborted(
                        spec,
                        ctx.isolation,
                        ctx.origin.elapsed(),
                        "worker thread did not report an outcome",
                    )
                })
            })
            .collect()
    }

    /// Reads the committed amount of `resource` on each node.
    ///
    /// # Errors
    ///
    /// Returns an error if a node cannot be read.
    pub fn capture_states(
        &self,
        resource: &Resource,
        nodes: impl IntoIterator<Item = NodeId>,
    ) -> ProbeResult<BTreeMap<NodeId, Option<f64>>> {
        let statement = Statement::select(resource.row());
        let mut states = BTreeMap::new();
        for node in nodes {
            let outcome = self
                .cluster
                .execute(node, &statement, IsolationLevel::ReadCommitted)?;
            states.insert(node, outcome.first_amount());
        }
        Ok(states)
    }

    fn capture_reachable_states(
        &self,
        resource: &Resource,
        nodes: BTreeSet<NodeId>,
    ) -> (BTreeMap<NodeId, Option<f64>>, BTreeSet<NodeId>) {
        let mut states = BTreeMap::new();
        let mut uncaptured = BTreeSet::new();
        for node in nodes {
            match self.capture_states(resource, [node]) {
                Ok(captured) => states.extend(captured),
                Err(e) => {
                    warn!(%node, resource = %resource, error = %e, "failed to capture final state");
                    uncaptured.insert(node);
                }
            }
        }
        (states, uncaptured)
    }

    fn sweep_worker_locks(&self, workers: &[WorkerSpec]) {
        for spec in workers {
            match self.worker_locks(&spec.name).release_everything_owned() {
                Ok(0) => {}
                Ok(count) => warn!(worker = %spec.name, count, "swept leftover worker locks"),
                Err(e) => warn!(worker = %spec.name, error = %e, "failed to sweep worker locks"),
            }
        }
    }

    /// Upserts the baseline amount of `resource` on every node.
    ///
    /// # Errors
    ///
    /// Returns the first node error after attempting every node.
    pub fn restore_baseline(&self, resource: &Resource) -> ProbeResult<()> {
        self.restore_each(resource)
            .into_iter()
            .find_map(|(_, result)| result.err())
            .map_or(Ok(()), |e| Err(e.into()))
    }

    fn restore_baseline_on_nodes(&self, resource: &Resource) -> BTreeSet<NodeId> {
        self.restore_each(resource)
            .into_iter()
            .filter_map(|(node, result)| result.is_err().then_some(node))
            .collect()
    }

    fn restore_each(&self, resource: &Resource) -> Vec<(NodeId, StoreResult<()>)> {
        let statement = Statement::upsert(resource.row(), self.config.baseline);
        self.cluster
            .node_ids()
            .into_iter()
            .map(|node| {
                let result = self
                    .cluster
                    .execute(node, &statement, IsolationLevel::ReadCommitted)
                    .map(|_| ());
                if let Err(e) = &result {
                    warn!(%node, resource = %resource, error = %e, "failed to restore baseline");
                }
                (node, result)
            })
            .collect()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("cluster", &self.cluster)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}
