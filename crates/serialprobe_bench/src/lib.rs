//! Benchmark utilities.

use serialprobe_store::{MemoryNode, NodeId, RowId};

/// Row every benchmark node is seeded with.
pub const BENCH_ROW: i64 = 60;

/// Returns nodes `1..=count`.
pub fn node_set(count: u32) -> Vec<NodeId> {
    (1..=count).map(NodeId::new).collect()
}

/// Creates node 1 holding [`BENCH_ROW`] at 1000.00.
pub fn seeded_node() -> MemoryNode {
    let node = MemoryNode::new(NodeId::new(1));
    node.seed(RowId::new(BENCH_ROW), 1000.0);
    node
}
