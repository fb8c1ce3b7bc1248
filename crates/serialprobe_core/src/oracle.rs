//! Serializability oracle.
//!
//! Runs an identical Worker set twice, concurrently and then sequentially,
//! and compares the final committed state on every targeted node. Matching
//! states are reported as [`Verdict::Equivalent`].
//!
//! This is a necessary, not sufficient, check: two runs can end in the same
//! state through a non-serializable history, and the sequential order is only
//! one of the possible serial orders. Reports say so.

use crate::driver::{Driver, ExecutionMode, ExecutionRun, RunSummary, WorkerOutcome, WorkerSpec};
use crate::error::ProbeResult;
use crate::types::Resource;
use serde::Serialize;
use serialprobe_store::{IsolationLevel, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Outcome of comparing two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Final states match on every node.
    Equivalent,
    /// At least one node ended in a different state.
    Violation,
}

/// A node whose final state differs between the two runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMismatch {
    /// Node compared.
    pub node: NodeId,
    /// Final amount after the concurrent run; `None` means deleted.
    pub concurrent: Option<f64>,
    /// Final amount after the sequential run; `None` means deleted.
    pub sequential: Option<f64>,
}

/// Two adjacent committed updates where the later one did not start from
/// the earlier one's result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LostUpdate {
    /// Worker that committed first.
    pub earlier: String,
    /// Node the earlier Worker wrote.
    pub earlier_node: NodeId,
    /// Worker that committed second.
    pub later: String,
    /// Node the later Worker wrote.
    pub later_node: NodeId,
    /// What the earlier Worker left behind.
    pub earlier_after: f64,
    /// What the later Worker read before writing.
    pub later_before: f64,
}

impl LostUpdate {
    /// Returns true if both Workers wrote different nodes.
    #[must_use]
    pub fn crosses_nodes(&self) -> bool {
        self.earlier_node != self.later_node
    }
}

/// Returns true if two observed states are the same within `tolerance`.
#[must_use]
pub fn same_state(a: Option<f64>, b: Option<f64>, tolerance: f64) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => (x - y).abs() <= tolerance,
        _ => false,
    }
}

/// Compares final per-node states; nodes present in only one map mismatch.
#[must_use]
pub fn compare_final_states(
    concurrent: &BTreeMap<NodeId, Option<f64>>,
    sequential: &BTreeMap<NodeId, Option<f64>>,
    tolerance: f64,
) -> Vec<StateMismatch> {
    let nodes: BTreeSet<NodeId> = concurrent.keys().chain(sequential.keys()).copied().collect();
    nodes
        .into_iter()
        .filter_map(|node| {
            let c = concurrent.get(&node).copied().flatten();
            let s = sequential.get(&node).copied().flatten();
            let both_present = concurrent.contains_key(&node) && sequential.contains_key(&node);
            if both_present && same_state(c, s, tolerance) {
                None
            } else {
                Some(StateMismatch {
                    node,
                    concurrent: c,
                    sequential: s,
                })
            }
        })
        .collect()
}

/// Finds potential lost updates in one run.
///
/// Successful writers of the whole run, on every node, are ordered by end
/// time. For each adjacent pair of updates, the later `before` must equal the
/// earlier `after` within `tolerance`. Pairs involving a delete are skipped.
#[must_use]
pub fn lost_updates(run: &ExecutionRun, tolerance: f64) -> Vec<LostUpdate> {
    let mut writers: Vec<&WorkerOutcome> = successful_writers(run).collect();
    writers.sort_by_key(|o| o.ended);
    adjacent_lost_updates(&writers, tolerance)
}

/// Like [`lost_updates`], but only pairs Workers that wrote the same node.
#[must_use]
pub fn lost_updates_per_node(run: &ExecutionRun, tolerance: f64) -> Vec<LostUpdate> {
    let mut by_node: BTreeMap<NodeId, Vec<&WorkerOutcome>> = BTreeMap::new();
    for outcome in successful_writers(run) {
        by_node.entry(outcome.node).or_default().push(outcome);
    }
    by_node
        .into_values()
        .flat_map(|mut writers| {
            writers.sort_by_key(|o| o.ended);
            adjacent_lost_updates(&writers, tolerance)
        })
        .collect()
}

fn successful_writers(run: &ExecutionRun) -> impl Iterator<Item = &WorkerOutcome> {
    run.outcomes
        .iter()
        .filter(|o| o.is_success() && o.operation.is_write())
}

fn adjacent_lost_updates(writers: &[&WorkerOutcome], tolerance: f64) -> Vec<LostUpdate> {
    writers
        .windows(2)
        .filter_map(|pair| {
            let (cur, next) = (pair[0], pair[1]);
            if !(cur.operation.is_update() && next.operation.is_update()) {
                return None;
            }
            let (after, before) = (cur.after?, next.before?);
            ((before - after).abs() > tolerance).then(|| LostUpdate {
                earlier: cur.worker.clone(),
                earlier_node: cur.node,
                later: next.worker.clone(),
                later_node: next.node,
                earlier_after: after,
                later_before: before,
            })
        })
        .collect()
}

/// Everything the oracle learned from one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleReport {
    /// Resource under test.
    pub resource: Resource,
    /// Isolation level of both runs.
    pub isolation: IsolationLevel,
    /// Comparison result. Approximate: see the module docs.
    pub verdict: Verdict,
    /// Nodes whose final states differ.
    pub mismatches: Vec<StateMismatch>,
    /// Nodes left out because either run could not read them.
    pub uncompared: BTreeSet<NodeId>,
    /// Potential lost updates in the concurrent run, across all nodes.
    pub lost_updates: Vec<LostUpdate>,
    /// Potential lost updates in the concurrent run between Workers of the
    /// same node.
    pub node_lost_updates: Vec<LostUpdate>,
    /// Concurrent run summary.
    pub concurrent_summary: RunSummary,
    /// Sequential run summary.
    pub sequential_summary: RunSummary,
    /// Sequential wall time divided by concurrent wall time.
    pub speedup: f64,
    /// Last committer of the concurrent run.
    pub concurrent_last_committer: Option<String>,
    /// Last committer of the sequential run.
    pub sequential_last_committer: Option<String>,
    /// The concurrent run.
    #[serde(skip)]
    pub concurrent: ExecutionRun,
    /// The sequential run.
    #[serde(skip)]
    pub sequential: ExecutionRun,
}

impl OracleReport {
    /// Returns true for [`Verdict::Equivalent`].
    #[must_use]
    pub fn is_equivalent(&self) -> bool {
        self.verdict == Verdict::Equivalent
    }
}

/// Compares concurrent and sequential executions of one Worker set.
#[derive(Debug, Clone, Copy)]
pub struct SerializabilityOracle<'a> {
    driver: &'a Driver,
}

impl<'a> SerializabilityOracle<'a> {
    /// Creates an oracle running on `driver`.
    #[must_use]
    pub const fn new(driver: &'a Driver) -> Self {
        Self { driver }
    }

    /// Runs `workers` concurrently, then sequentially, and compares.
    ///
    /// # Errors
    ///
    /// Returns an error if either run cannot be executed.
    pub fn verify(
        &self,
        resource: &Resource,
        workers: &[WorkerSpec],
        isolation: IsolationLevel,
    ) -> ProbeResult<OracleReport> {
        let concurrent = self
            .driver
            .run(resource, workers, isolation, ExecutionMode::Concurrent)?;
        let sequential = self
            .driver
            .run(resource, workers, isolation, ExecutionMode::Sequential)?;
        Ok(self.compare(concurrent, sequential))
    }

    /// Compares two finished runs of the same Worker set.
    #[must_use]
    pub fn compare(&self, concurrent: ExecutionRun, sequential: ExecutionRun) -> OracleReport {
        let tolerance = self.driver.config().amount_tolerance;
        let uncompared: BTreeSet<NodeId> = concurrent
            .uncaptured
            .union(&sequential.uncaptured)
            .copied()
            .collect();
        if !uncompared.is_empty() {
            warn!(
                resource = %concurrent.resource,
                nodes = ?uncompared,
                "nodes without a captured final state are left out of the comparison"
            );
        }
        let comparable = |states: &BTreeMap<NodeId, Option<f64>>| -> BTreeMap<NodeId, Option<f64>> {
            states
                .iter()
                .filter(|(node, _)| !uncompared.contains(node))
                .map(|(&node, &state)| (node, state))
                .collect()
        };
        let mismatches = compare_final_states(
            &comparable(&concurrent.final_states),
            &comparable(&sequential.final_states),
            tolerance,
        );
        let verdict = if mismatches.is_empty() {
            Verdict::Equivalent
        } else {
            Verdict::Violation
        };
        let lost = lost_updates(&concurrent, tolerance);
        let node_lost = lost_updates_per_node(&concurrent, tolerance);

        let concurrent_summary = concurrent.summary();
        let sequential_summary = sequential.summary();
        let concurrent_wall = concurrent_summary.wall_time.as_secs_f64();
        let speedup = if concurrent_wall > 0.0 {
            sequential_summary.wall_time.as_secs_f64() / concurrent_wall
        } else {
            0.0
        };

        match verdict {
            Verdict::Equivalent => info!(
                resource = %concurrent.resource,
                isolation = %concurrent.isolation,
                "concurrent run matches sequential run"
            ),
            Verdict::Violation => warn!(
                resource = %concurrent.resource,
                isolation = %concurrent.isolation,
                mismatches = mismatches.len(),
                "concurrent run diverges from sequential run"
            ),
        }

        OracleReport {
            resource: concurrent.resource.clone(),
            isolation: concurrent.isolation,
            verdict,
            mismatches,
            uncompared,
            lost_updates: lost,
            node_lost_updates: node_lost,
            concurrent_summary,
            sequential_summary,
            speedup,
            concurrent_last_committer: concurrent.last_committer().map(|o| o.worker.clone()),
            sequential_last_committer: sequential.last_committer().map(|o| o.worker.clone()),
            concurrent,
            sequential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{FailureCategory, Operation, WorkerOutcome, WorkerStatus};
    use std::time::Duration;

    const N1: NodeId = NodeId::new(1);
    const N2: NodeId = NodeId::new(2);

    fn writer(name: &str, node: NodeId, end_ms: u64, before: f64, after: f64) -> WorkerOutcome {
        WorkerOutcome {
            worker: name.to_string(),
            node,
            operation: Operation::Update { amount: after },
            isolation: IsolationLevel::ReadCommitted,
            started: Duration::ZERO,
            ended: Duration::from_millis(end_ms),
            status: WorkerStatus::Success,
            before: Some(before),
            after: Some(after),
            error: None,
        }
    }

    fn run(outcomes: Vec<WorkerOutcome>) -> ExecutionRun {
        ExecutionRun {
            resource: Resource::trans(60),
            isolation: IsolationLevel::ReadCommitted,
            mode: ExecutionMode::Concurrent,
            started_at_ms: 0,
            wall_time: Duration::from_secs(1),
            outcomes,
            final_states: BTreeMap::new(),
            uncaptured: BTreeSet::new(),
            unrestored: BTreeSet::new(),
        }
    }

    #[test]
    fn chained_updates_are_clean() {
        let r = run(vec![
            writer("T2", N1, 200, 12111.11, 13222.22),
            writer("T1", N1, 100, 1000.0, 12111.11),
        ]);
        assert!(lost_updates(&r, 0.01).is_empty());
    }

    #[test]
    fn stale_before_is_flagged() {
        let r = run(vec![
            writer("T1", N1, 100, 1000.0, 12111.11),
            writer("T2", N1, 200, 1000.0, 13222.22),
        ]);
        let lost = lost_updates(&r, 0.01);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].earlier, "T1");
        assert_eq!(lost[0].later, "T2");
        assert_eq!(lost[0].later_before, 1000.0);
    }

    #[test]
    fn writers_on_different_nodes_are_paired() {
        let r = run(vec![
            writer("T5", N2, 200, 1000.0, 16555.55),
            writer("T1", N1, 100, 1000.0, 12111.11),
        ]);
        let lost = lost_updates(&r, 0.01);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].earlier, "T1");
        assert_eq!(lost[0].earlier_node, N1);
        assert_eq!(lost[0].later, "T5");
        assert_eq!(lost[0].later_node, N2);
        assert_eq!(lost[0].later_before, 1000.0);
        assert!(lost[0].crosses_nodes());

        assert!(lost_updates_per_node(&r, 0.01).is_empty());
    }

    #[test]
    fn interleaved_nodes_break_the_global_chain() {
        let r = run(vec![
            writer("T1", N1, 100, 1000.0, 12111.11),
            writer("T5", N2, 150, 1000.0, 16555.55),
            writer("T2", N1, 200, 12111.11, 13222.22),
        ]);
        let lost = lost_updates(&r, 0.01);
        let pairs: Vec<_> = lost.iter().map(|l| (l.earlier.as_str(), l.later.as_str())).collect();
        assert_eq!(pairs, [("T1", "T5"), ("T5", "T2")]);
        assert!(lost_updates_per_node(&r, 0.01).is_empty());
    }

    #[test]
    fn per_node_view_flags_stale_before() {
        let r = run(vec![
            writer("T1", N1, 100, 1000.0, 12111.11),
            writer("T5", N2, 150, 1000.0, 16555.55),
            writer("T2", N1, 200, 1000.0, 13222.22),
        ]);
        let lost = lost_updates_per_node(&r, 0.01);
        assert_eq!(lost.len(), 1);
        assert_eq!((lost[0].earlier.as_str(), lost[0].later.as_str()), ("T1", "T2"));
        assert!(!lost[0].crosses_nodes());
    }

    #[test]
    fn failed_writers_are_ignored() {
        let mut failed = writer("T2", N1, 150, 1000.0, 13222.22);
        failed.status = WorkerStatus::Failed(FailureCategory::LockContention);
        let r = run(vec![
            writer("T1", N1, 100, 1000.0, 12111.11),
            failed,
            writer("T3", N1, 200, 12111.11, 14333.33),
        ]);
        assert!(lost_updates(&r, 0.01).is_empty());
    }

    #[test]
    fn state_comparison() {
        let a = BTreeMap::from([(N1, Some(1000.0)), (N2, None)]);
        let b = BTreeMap::from([(N1, Some(1000.004)), (N2, None)]);
        assert!(compare_final_states(&a, &b, 0.01).is_empty());

        let c = BTreeMap::from([(N1, Some(1000.0)), (N2, Some(5.0))]);
        let mismatches = compare_final_states(&a, &c, 0.01);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].node, N2);

        let d = BTreeMap::from([(N1, Some(1000.0))]);
        assert_eq!(compare_final_states(&a, &d, 0.01).len(), 1);
    }
}
