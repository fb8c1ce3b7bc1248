//! Execution runs and their summaries.

use super::worker::{FailureCategory, WorkerOutcome};
use crate::config::millis;
use crate::types::Resource;
use serde::{Deserialize, Serialize};
use serialprobe_store::{IsolationLevel, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// How the Workers of a run are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One thread per Worker, launched with a stagger.
    Concurrent,
    /// Each Worker runs to completion before the next starts.
    Sequential,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Concurrent => f.write_str("concurrent"),
            ExecutionMode::Sequential => f.write_str("sequential"),
        }
    }
}

/// Every Worker outcome of one run plus the state it left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRun {
    /// Resource the Workers contended on.
    pub resource: Resource,
    /// Isolation level of every Worker transaction.
    pub isolation: IsolationLevel,
    /// Scheduling mode.
    pub mode: ExecutionMode,
    /// Wall-clock start in milliseconds since the Unix epoch.
    pub started_at_ms: u64,
    /// Time from first launch to last Worker finishing.
    #[serde(with = "millis")]
    pub wall_time: Duration,
    /// Outcomes in Worker order.
    pub outcomes: Vec<WorkerOutcome>,
    /// Committed amount per targeted node before the baseline was restored;
    /// `None` means the row was deleted.
    pub final_states: BTreeMap<NodeId, Option<f64>>,
    /// Targeted nodes whose final state could not be read.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub uncaptured: BTreeSet<NodeId>,
    /// Nodes left without the baseline because the restore failed.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unrestored: BTreeSet<NodeId>,
}

impl ExecutionRun {
    /// Summarizes the run.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_run(self)
    }

    /// Returns the successful writer that committed last, if any.
    #[must_use]
    pub fn last_committer(&self) -> Option<&WorkerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success() && o.operation.is_write())
            .max_by_key(|o| o.ended)
    }

    /// Returns the last successful writer on each node.
    #[must_use]
    pub fn last_committers_by_node(&self) -> BTreeMap<NodeId, &WorkerOutcome> {
        let mut last: BTreeMap<NodeId, &WorkerOutcome> = BTreeMap::new();
        for outcome in self
            .outcomes
            .iter()
            .filter(|o| o.is_success() && o.operation.is_write())
        {
            let slot = last.entry(outcome.node).or_insert(outcome);
            if outcome.ended > slot.ended {
                *slot = outcome;
            }
        }
        last
    }

    /// Returns the captured final state of `node`.
    ///
    /// The outer `None` means the node was not captured.
    #[must_use]
    pub fn final_state(&self, node: NodeId) -> Option<Option<f64>> {
        self.final_states.get(&node).copied()
    }

    /// Returns true if every node was put back to the baseline.
    #[must_use]
    pub fn is_restored(&self) -> bool {
        self.unrestored.is_empty()
    }
}

/// Aggregate figures for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Scheduling mode.
    pub mode: ExecutionMode,
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Number of Workers.
    pub total: usize,
    /// Number of committed Workers.
    pub successes: usize,
    /// Failed Workers per category.
    pub failures: BTreeMap<FailureCategory, usize>,
    /// Wall time of the run.
    #[serde(with = "millis")]
    pub wall_time: Duration,
    /// Sum of Worker durations.
    #[serde(with = "millis")]
    pub worker_time: Duration,
    /// Committed Workers per second of wall time.
    pub throughput: f64,
    /// Mean Worker duration.
    #[serde(with = "millis")]
    pub avg_response: Duration,
    /// Committed Workers as a percentage of all Workers.
    pub success_rate: f64,
    /// Sum of Worker durations divided by wall time.
    pub concurrency_factor: f64,
}

impl RunSummary {
    /// Computes the summary of `run`.
    #[must_use]
    pub fn from_run(run: &ExecutionRun) -> Self {
        let total = run.outcomes.len();
        let successes = run.outcomes.iter().filter(|o| o.is_success()).count();
        let mut failures = BTreeMap::new();
        for category in run.outcomes.iter().filter_map(WorkerOutcome::failure) {
            *failures.entry(category).or_insert(0) += 1;
        }

        let worker_time: Duration = run.outcomes.iter().map(WorkerOutcome::duration).sum();
        let wall = run.wall_time.as_secs_f64();
        let throughput = if wall > 0.0 { successes as f64 / wall } else { 0.0 };
        let avg_response = u32::try_from(total)
            .ok()
            .filter(|&n| n > 0)
            .map_or(Duration::ZERO, |n| worker_time / n);
        let success_rate = if total > 0 {
            successes as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        let concurrency_factor = if wall > 0.0 {
            worker_time.as_secs_f64() / wall
        } else {
            0.0
        };

        Self {
            mode: run.mode,
            isolation: run.isolation,
            total,
            successes,
            failures,
            wall_time: run.wall_time,
            worker_time,
            throughput,
            avg_response,
            success_rate,
            concurrency_factor,
        }
    }

    /// Returns the number of failed Workers.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.total - self.successes
    }

    /// Returns the number of failures in `category`.
    #[must_use]
    pub fn failures_in(&self, category: FailureCategory) -> usize {
        self.failures.get(&category).copied().unwrap_or(0)
    }

    /// Returns true if Workers overlapped: wall time under 80% of the summed
    /// Worker durations.
    #[must_use]
    pub fn ran_concurrently(&self) -> bool {
        self.wall_time.as_secs_f64() < 0.8 * self.worker_time.as_secs_f64()
    }
}
