//! Property-based test generators using proptest.
//!
//! Provides strategies for node sets, Worker sets and isolation levels.

use proptest::prelude::*;
use serialprobe_core::WorkerSpec;
use serialprobe_store::{IsolationLevel, NodeId};

/// Strategy for node ids in `1..=max`.
pub fn node_id_strategy(max: u32) -> impl Strategy<Value = NodeId> {
    (1..=max).prop_map(NodeId::new)
}

/// Strategy for node sets as callers pass them: unordered, possibly with
/// duplicates, possibly empty.
pub fn node_set_strategy(max: u32) -> impl Strategy<Value = Vec<NodeId>> {
    prop::collection::vec(node_id_strategy(max), 0..8)
}

/// Strategy for isolation levels.
pub fn isolation_strategy() -> impl Strategy<Value = IsolationLevel> {
    prop::sample::select(IsolationLevel::ALL.to_vec())
}

/// Strategy for amounts with two decimals, as the workloads write them.
pub fn amount_strategy() -> impl Strategy<Value = f64> {
    (0u32..10_000_000).prop_map(|cents| f64::from(cents) / 100.0)
}

/// Strategy for Worker sets of update and delete Workers with unique names
/// on nodes `1..=nodes`.
pub fn worker_set_strategy(nodes: u32, max_workers: usize) -> impl Strategy<Value = Vec<WorkerSpec>> {
    prop::collection::vec(
        (node_id_strategy(nodes), prop::option::weighted(0.9, amount_strategy())),
        1..=max_workers,
    )
    .prop_map(|picks| {
        picks
            .into_iter()
            .enumerate()
            .map(|(i, (node, amount))| {
                let name = format!("W{}", i + 1);
                match amount {
                    Some(amount) => WorkerSpec::update(name, node, amount),
                    None => WorkerSpec::delete(name, node),
                }
            })
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
