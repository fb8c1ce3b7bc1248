//! Predefined workloads.
//!
//! The write-conflict scenarios spread ten writers over three nodes:
//!
//! ```text
//! node1: T1 T2 T3 T4
//! node2: T5 T6 T7 T8
//! node3: T9 T10
//! ```
//!
//! Writer `Ti` sets `11000.00 + i × 1111.11`. In the mixed scenario T4 and T8
//! delete the row instead.
//!
//! The read scenarios put one reader on each node (`R1`..`R3`). In the
//! read-write scenario the node-1 reader is replaced by writer `W1`, which
//! sets [`READ_WRITE_AMOUNT`] while the others read.

use crate::driver::WorkerSpec;
use serde::{Deserialize, Serialize};
use serialprobe_store::NodeId;
use std::fmt;
use std::str::FromStr;

/// Number of writers in the write-conflict scenarios.
pub const WRITERS: u32 = 10;

/// Amount written by `W1` in the read-write scenario.
pub const READ_WRITE_AMOUNT: f64 = 2000.0;

/// Workers per node, in node order.
const LAYOUT: [(u32, std::ops::RangeInclusive<u32>); 3] = [(1, 1..=4), (2, 5..=8), (3, 9..=10)];

/// Writers that delete in the mixed scenario.
const MIXED_DELETERS: [u32; 2] = [4, 8];

/// Amount written by writer `index`.
#[must_use]
pub fn writer_amount(index: u32) -> f64 {
    11000.0 + f64::from(index) * 1111.11
}

/// A predefined Worker set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Every writer updates.
    UpdateOnly,
    /// The last writer on nodes 1 and 2 deletes.
    Mixed,
    /// One reader per node, all reading at once.
    ConcurrentReads,
    /// A writer on node 1 while the other nodes read.
    ReadWrite,
}

impl Scenario {
    /// All scenarios.
    pub const ALL: [Scenario; 4] = [
        Scenario::UpdateOnly,
        Scenario::Mixed,
        Scenario::ConcurrentReads,
        Scenario::ReadWrite,
    ];

    /// Builds the Worker set in launch order.
    #[must_use]
    pub fn workers(self) -> Vec<WorkerSpec> {
        match self {
            Scenario::UpdateOnly | Scenario::Mixed => self.writers(),
            Scenario::ConcurrentReads => self
                .nodes()
                .into_iter()
                .map(|node| WorkerSpec::read(format!("R{}", node.as_u32()), node))
                .collect(),
            Scenario::ReadWrite => self
                .nodes()
                .into_iter()
                .map(|node| match node.as_u32() {
                    1 => WorkerSpec::update("W1", node, READ_WRITE_AMOUNT),
                    id => WorkerSpec::read(format!("R{id}"), node),
                })
                .collect(),
        }
    }

    fn writers(self) -> Vec<WorkerSpec> {
        LAYOUT
            .iter()
            .flat_map(|(node, range)| range.clone().map(move |i| (NodeId::new(*node), i)))
            .map(|(node, i)| {
                let name = format!("T{i}");
                if self == Scenario::Mixed && MIXED_DELETERS.contains(&i) {
                    WorkerSpec::delete(name, node)
                } else {
                    WorkerSpec::update(name, node, writer_amount(i))
                }
            })
            .collect()
    }

    /// Returns the nodes the scenario targets.
    #[must_use]
    pub fn nodes(self) -> Vec<NodeId> {
        LAYOUT.iter().map(|(node, _)| NodeId::new(*node)).collect()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::UpdateOnly => f.write_str("update-only"),
            Scenario::Mixed => f.write_str("mixed"),
            Scenario::ConcurrentReads => f.write_str("concurrent-reads"),
            Scenario::ReadWrite => f.write_str("read-write"),
        }
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "update-only" | "update" => Ok(Scenario::UpdateOnly),
            "mixed" => Ok(Scenario::Mixed),
            "concurrent-reads" | "reads" => Ok(Scenario::ConcurrentReads),
            "read-write" => Ok(Scenario::ReadWrite),
            other => Err(format!("unknown scenario: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Operation;

    #[test]
    fn update_only_layout() {
        let workers = Scenario::UpdateOnly.workers();
        assert_eq!(workers.len(), WRITERS as usize);
        let per_node = |n: u32| workers.iter().filter(|w| w.node == NodeId::new(n)).count();
        assert_eq!((per_node(1), per_node(2), per_node(3)), (4, 4, 2));
        assert_eq!(workers[0].name, "T1");
        assert_eq!(workers[9].name, "T10");
        assert!(workers.iter().all(|w| w.operation.is_update()));
    }

    #[test]
    fn writer_amounts() {
        assert!((writer_amount(1) - 12111.11).abs() < 1e-9);
        assert!((writer_amount(10) - 22111.1).abs() < 1e-9);
    }

    #[test]
    fn mixed_deletes_t4_and_t8() {
        let workers = Scenario::Mixed.workers();
        let deleters: Vec<_> = workers
            .iter()
            .filter(|w| w.operation == Operation::Delete)
            .map(|w| w.name.as_str())
            .collect();
        assert_eq!(deleters, vec!["T4", "T8"]);
    }

    #[test]
    fn concurrent_reads_has_one_reader_per_node() {
        let workers = Scenario::ConcurrentReads.workers();
        let names: Vec<_> = workers.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["R1", "R2", "R3"]);
        assert!(workers.iter().all(|w| w.operation == Operation::Read));
        assert_eq!(workers[2].node, NodeId::new(3));
    }

    #[test]
    fn read_write_has_one_writer_on_node_one() {
        let workers = Scenario::ReadWrite.workers();
        let names: Vec<_> = workers.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["W1", "R2", "R3"]);
        assert_eq!(workers[0].node, NodeId::new(1));
        assert_eq!(workers[0].operation, Operation::Update { amount: READ_WRITE_AMOUNT });
        assert!(workers[1..].iter().all(|w| w.operation == Operation::Read));
    }

    #[test]
    fn scenario_names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.to_string().parse::<Scenario>().unwrap(), scenario);
        }
        assert!("chaos".parse::<Scenario>().is_err());
    }
}
