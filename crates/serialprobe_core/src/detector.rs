//! Anomaly detector.
//!
//! Classifies read and write phenomena from timestamped traces alone; it
//! never looks inside an engine. Each finding is tagged with whether the
//! isolation level it ran under permits it:
//!
//! | level | dirty read | non-repeatable read | lost update |
//! |-------|------------|---------------------|-------------|
//! | READ UNCOMMITTED | permitted | permitted | permitted |
//! | READ COMMITTED | - | permitted | permitted |
//! | REPEATABLE READ | - | - | - |
//! | SERIALIZABLE | - | - | - |

use crate::config::HarnessConfig;
use crate::driver::{ExecutionRun, ProbeTrace};
use crate::oracle;
use serde::Serialize;
use serialprobe_store::{IsolationLevel, NodeId};
use std::fmt;
use std::time::Duration;

/// A read or write phenomenon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phenomenon {
    /// A reader saw a write that was not committed.
    DirtyRead,
    /// Two reads in one transaction returned different values.
    NonRepeatableRead,
    /// A committed update was overwritten without being read.
    LostUpdate,
}

impl fmt::Display for Phenomenon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phenomenon::DirtyRead => "dirty read",
            Phenomenon::NonRepeatableRead => "non-repeatable read",
            Phenomenon::LostUpdate => "lost update",
        })
    }
}

/// Returns true if `isolation` allows `phenomenon`.
#[must_use]
pub const fn permits(isolation: IsolationLevel, phenomenon: Phenomenon) -> bool {
    match isolation {
        IsolationLevel::ReadUncommitted => true,
        IsolationLevel::ReadCommitted => !matches!(phenomenon, Phenomenon::DirtyRead),
        IsolationLevel::RepeatableRead | IsolationLevel::Serializable => false,
    }
}

/// One detected phenomenon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    /// What was observed.
    pub phenomenon: Phenomenon,
    /// Isolation level of the transactions involved.
    pub isolation: IsolationLevel,
    /// Node it was observed on.
    pub node: NodeId,
    /// Workers involved.
    pub workers: Vec<String>,
    /// True if the isolation level permits it.
    pub expected: bool,
    /// Human-readable detail.
    pub description: String,
}

impl Anomaly {
    fn new(
        phenomenon: Phenomenon,
        isolation: IsolationLevel,
        node: NodeId,
        workers: Vec<String>,
        description: String,
    ) -> Self {
        Self {
            phenomenon,
            isolation,
            node,
            workers,
            expected: permits(isolation, phenomenon),
            description,
        }
    }

    /// Returns true if the isolation level forbids this phenomenon.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        !self.expected
    }
}

/// Classifies traces into anomalies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyDetector {
    /// Slack allowed when comparing timestamps taken on different threads.
    pub jitter: Duration,
    /// Amounts closer than this compare equal.
    pub tolerance: f64,
}

impl AnomalyDetector {
    /// Creates a detector.
    #[must_use]
    pub const fn new(jitter: Duration, tolerance: f64) -> Self {
        Self { jitter, tolerance }
    }

    /// Creates a detector from the harness settings.
    #[must_use]
    pub const fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.jitter, config.amount_tolerance)
    }

    fn same(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.tolerance
    }

    /// Finds reads of the writer's in-flight value that happened while it was
    /// uncommitted.
    ///
    /// A read counts if it returned the in-flight value (distinct from the
    /// writer's `before`), came after the write, and either the writer rolled
    /// back or the read finished more than `jitter` before the commit.
    #[must_use]
    pub fn dirty_reads(&self, trace: &ProbeTrace) -> Vec<Anomaly> {
        let writer = &trace.writer;
        if writer.before.is_some_and(|b| self.same(b, writer.in_flight)) {
            return Vec::new();
        }
        trace
            .reader
            .reads
            .iter()
            .filter(|sample| {
                let Some(amount) = sample.amount else {
                    return false;
                };
                self.same(amount, writer.in_flight)
                    && sample.at >= writer.wrote_at
                    && (!writer.committed || sample.at + self.jitter < writer.finished_at)
            })
            .map(|sample| {
                Anomaly::new(
                    Phenomenon::DirtyRead,
                    trace.isolation,
                    trace.reader.node,
                    vec![writer.worker.clone(), trace.reader.worker.clone()],
                    format!(
                        "{} read {:.2} written by {} at {:?}, {} at {:?}",
                        trace.reader.worker,
                        writer.in_flight,
                        writer.worker,
                        sample.at,
                        if writer.committed { "committed" } else { "rolled back" },
                        writer.finished_at
                    ),
                )
            })
            .collect()
    }

    /// Finds consecutive reads in the reader's transaction that differ.
    #[must_use]
    pub fn non_repeatable_reads(&self, trace: &ProbeTrace) -> Vec<Anomaly> {
        let reader = &trace.reader;
        reader
            .reads
            .windows(2)
            .filter(|pair| match (pair[0].amount, pair[1].amount) {
                (Some(a), Some(b)) => !self.same(a, b),
                (None, None) => false,
                _ => true,
            })
            .map(|pair| {
                Anomaly::new(
                    Phenomenon::NonRepeatableRead,
                    trace.isolation,
                    reader.node,
                    vec![reader.worker.clone(), trace.writer.worker.clone()],
                    format!(
                        "{} read {:?} then {:?} in one transaction",
                        reader.worker, pair[0].amount, pair[1].amount
                    ),
                )
            })
            .collect()
    }

    /// Runs both read classifiers on a probe trace.
    #[must_use]
    pub fn classify_probe(&self, trace: &ProbeTrace) -> Vec<Anomaly> {
        let mut found = self.dirty_reads(trace);
        found.extend(self.non_repeatable_reads(trace));
        found
    }

    /// Reports potential lost updates in a run.
    #[must_use]
    pub fn lost_updates(&self, run: &ExecutionRun) -> Vec<Anomaly> {
        oracle::lost_updates(run, self.tolerance)
            .into_iter()
            .map(|lost| {
                Anomaly::new(
                    Phenomenon::LostUpdate,
                    run.isolation,
                    lost.later_node,
                    vec![lost.earlier.clone(), lost.later.clone()],
                    format!(
                        "{}@{} read {:.2} but {}@{} had committed {:.2}",
                        lost.later,
                        lost.later_node,
                        lost.later_before,
                        lost.earlier,
                        lost.earlier_node,
                        lost.earlier_after
                    ),
                )
            })
            .collect()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ReadSample, ReaderTrace, WriterTrace};
    use crate::types::Resource;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn trace(isolation: IsolationLevel, committed: bool, reads: Vec<(u64, Option<f64>)>) -> ProbeTrace {
        ProbeTrace {
            resource: Resource::trans(60),
            isolation,
            writer: WriterTrace {
                worker: "probe-writer".into(),
                node: NodeId::new(1),
                before: Some(1000.0),
                in_flight: 3000.0,
                wrote_at: ms(10),
                finished_at: ms(3010),
                committed,
            },
            reader: ReaderTrace {
                worker: "probe-reader".into(),
                node: NodeId::new(1),
                isolation,
                reads: reads
                    .into_iter()
                    .map(|(at, amount)| ReadSample { at: ms(at), amount })
                    .collect(),
            },
        }
    }

    #[test]
    fn permitted_phenomena_table() {
        use IsolationLevel::*;
        use Phenomenon::*;
        assert!(permits(ReadUncommitted, DirtyRead));
        assert!(!permits(ReadCommitted, DirtyRead));
        assert!(permits(ReadCommitted, NonRepeatableRead));
        assert!(permits(ReadCommitted, LostUpdate));
        for p in [DirtyRead, NonRepeatableRead, LostUpdate] {
            assert!(!permits(RepeatableRead, p));
            assert!(!permits(Serializable, p));
        }
    }

    #[test]
    fn uncommitted_read_is_dirty_and_expected() {
        let detector = AnomalyDetector::new(ms(250), 0.01);
        let found = detector.dirty_reads(&trace(IsolationLevel::ReadUncommitted, true, vec![(1010, Some(3000.0))]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].phenomenon, Phenomenon::DirtyRead);
        assert!(found[0].expected);
    }

    #[test]
    fn read_after_commit_is_not_dirty() {
        let detector = AnomalyDetector::new(ms(250), 0.01);
        let found = detector.dirty_reads(&trace(IsolationLevel::Serializable, true, vec![(3012, Some(3000.0))]));
        assert!(found.is_empty());
    }

    #[test]
    fn read_within_jitter_of_commit_is_not_dirty() {
        let detector = AnomalyDetector::new(ms(250), 0.01);
        let found = detector.dirty_reads(&trace(IsolationLevel::ReadCommitted, true, vec![(2900, Some(3000.0))]));
        assert!(found.is_empty());
    }

    #[test]
    fn rolled_back_value_seen_is_dirty() {
        let detector = AnomalyDetector::new(ms(250), 0.01);
        let found = detector.dirty_reads(&trace(IsolationLevel::ReadCommitted, false, vec![(2900, Some(3000.0))]));
        assert_eq!(found.len(), 1);
        assert!(found[0].is_violation());
    }

    #[test]
    fn committed_value_read_is_clean() {
        let detector = AnomalyDetector::new(ms(250), 0.01);
        let found = detector.dirty_reads(&trace(IsolationLevel::ReadCommitted, true, vec![(1010, Some(1000.0))]));
        assert!(found.is_empty());
    }

    #[test]
    fn changed_reread_is_non_repeatable() {
        let detector = AnomalyDetector::default();
        let rc = trace(IsolationLevel::ReadCommitted, true, vec![(0, Some(1000.0)), (1500, Some(1500.0))]);
        let found = detector.non_repeatable_reads(&rc);
        assert_eq!(found.len(), 1);
        assert!(found[0].expected);

        let rr = trace(IsolationLevel::RepeatableRead, true, vec![(0, Some(1000.0)), (1500, Some(1500.0))]);
        assert!(detector.non_repeatable_reads(&rr)[0].is_violation());
    }

    #[test]
    fn stable_reread_is_clean() {
        let detector = AnomalyDetector::default();
        let t = trace(IsolationLevel::RepeatableRead, true, vec![(0, Some(1000.0)), (1500, Some(1000.001))]);
        assert!(detector.classify_probe(&t).is_empty());
    }

    #[test]
    fn lost_update_across_nodes_is_reported_on_later_node() {
        use crate::driver::{ExecutionMode, ExecutionRun, Operation, WorkerOutcome, WorkerStatus};
        use std::collections::{BTreeMap, BTreeSet};

        let outcome = |name: &str, node: u32, end: u64, after: f64| WorkerOutcome {
            worker: name.to_string(),
            node: NodeId::new(node),
            operation: Operation::Update { amount: after },
            isolation: IsolationLevel::Serializable,
            started: Duration::ZERO,
            ended: ms(end),
            status: WorkerStatus::Success,
            before: Some(1000.0),
            after: Some(after),
            error: None,
        };
        let run = ExecutionRun {
            resource: Resource::trans(60),
            isolation: IsolationLevel::Serializable,
            mode: ExecutionMode::Sequential,
            started_at_ms: 0,
            wall_time: ms(400),
            outcomes: vec![outcome("T1", 1, 100, 12111.11), outcome("T5", 2, 200, 16555.55)],
            final_states: BTreeMap::new(),
            uncaptured: BTreeSet::new(),
            unrestored: BTreeSet::new(),
        };

        let found = AnomalyDetector::default().lost_updates(&run);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].phenomenon, Phenomenon::LostUpdate);
        assert_eq!(found[0].node, NodeId::new(2));
        assert_eq!(found[0].workers, ["T1", "T5"]);
        assert!(found[0].is_violation());
    }
}
