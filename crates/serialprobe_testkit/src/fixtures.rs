//! Test fixtures and harness helpers.
//!
//! Provides seeded in-memory clusters and drivers with scaled-down timings
//! so scenario tests finish in well under a second per run.

use serialprobe_core::{
    Driver, DwellConfig, FileLockTable, HarnessConfig, LockManager, ProbeConfig, Resource,
};
use serialprobe_store::{Cluster, MemoryNode, NodeId, NodeStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Row every fixture seeds.
pub const TEST_ROW: i64 = 60;

/// Amount every fixture seeds.
pub const TEST_BASELINE: f64 = 1000.0;

/// Engine lock-wait timeout used by fixture nodes.
pub const TEST_LOCK_WAIT: Duration = Duration::from_secs(5);

/// The resource fixtures seed.
pub fn test_resource() -> Resource {
    Resource::trans(TEST_ROW)
}

/// Harness settings with every duration scaled down.
pub fn fast_config() -> HarnessConfig {
    HarnessConfig::default()
        .lease(Duration::from_secs(10))
        .lock_timeout(Duration::from_secs(5))
        .poll_interval(Duration::from_millis(2))
        .dwell(Duration::from_millis(30), Duration::from_millis(15))
        .native_lock_wait(TEST_LOCK_WAIT)
        .stagger(Duration::from_millis(5))
        .jitter(Duration::from_millis(50))
        .probe(fast_probe_config())
}

/// Probe timings keeping the default ratios at a tenth of the scale.
pub fn fast_probe_config() -> ProbeConfig {
    ProbeConfig {
        writer_hold: Duration::from_millis(300),
        reader_delay: Duration::from_millis(100),
        reread_gap: Duration::from_millis(150),
        modifier_delay: Duration::from_millis(50),
        ..ProbeConfig::default()
    }
}

/// Dwell settings of [`fast_config`].
pub fn fast_dwell() -> DwellConfig {
    fast_config().dwell
}

/// A set of in-memory nodes and the cluster over them.
#[derive(Clone)]
pub struct TestCluster {
    /// The nodes, in id order.
    pub nodes: Vec<MemoryNode>,
    /// Cluster view over `nodes`.
    pub cluster: Cluster,
}

impl TestCluster {
    /// Creates nodes 1, 2 and 3 with [`TEST_ROW`] seeded to [`TEST_BASELINE`].
    pub fn three_nodes() -> Self {
        Self::with_nodes(&[1, 2, 3])
    }

    /// Creates the given nodes with [`TEST_ROW`] seeded to [`TEST_BASELINE`].
    pub fn with_nodes(ids: &[u32]) -> Self {
        let nodes: Vec<MemoryNode> = ids
            .iter()
            .map(|&id| {
                let node = MemoryNode::with_lock_wait_timeout(NodeId::new(id), TEST_LOCK_WAIT);
                node.seed(test_resource().row(), TEST_BASELINE);
                node
            })
            .collect();
        let cluster = nodes.iter().fold(Cluster::new(), |cluster, node| {
            cluster.with_node(Arc::new(node.clone()) as Arc<dyn NodeStore>)
        });
        Self { nodes, cluster }
    }

    /// Returns the node with `id`.
    ///
    /// # Panics
    ///
    /// Panics if the fixture has no such node.
    pub fn node(&self, id: u32) -> &MemoryNode {
        self.nodes
            .iter()
            .find(|n| n.node_id() == NodeId::new(id))
            .unwrap_or_else(|| panic!("fixture has no node{id}"))
    }

    /// Returns true if every node holds the baseline and no open transaction.
    pub fn is_at_baseline(&self) -> bool {
        self.nodes.iter().all(|n| {
            n.committed_amount(test_resource().row()) == Some(TEST_BASELINE)
                && n.active_transactions() == 0
        })
    }
}

/// A driver over a [`TestCluster`] with automatic cleanup.
pub struct TestHarness {
    /// The driver.
    pub driver: Driver,
    /// The nodes behind the driver.
    pub nodes: TestCluster,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestHarness {
    /// Creates a harness with a process-local lock table.
    pub fn memory() -> Self {
        Self::memory_with(fast_config())
    }

    /// Creates a harness with a process-local lock table and `config`.
    pub fn memory_with(config: HarnessConfig) -> Self {
        let nodes = TestCluster::three_nodes();
        Self {
            driver: Driver::in_memory(nodes.cluster.clone(), config),
            nodes,
            _temp_dir: None,
        }
    }

    /// Creates a harness whose locks live in a file in a temporary directory.
    pub fn file_locked() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let table = FileLockTable::open(temp_dir.path().join("locks.json"))
            .expect("Failed to open lock table");
        let config = fast_config();
        let locks = LockManager::new(Arc::new(table), config.owner.clone(), config.lock_options());
        let nodes = TestCluster::three_nodes();
        Self {
            driver: Driver::new(nodes.cluster.clone(), locks, config),
            nodes,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the temporary directory if file-locked.
    pub fn dir(&self) -> Option<&std::path::Path> {
        self._temp_dir.as_ref().map(|d| d.path())
    }
}

impl std::ops::Deref for TestHarness {
    type Target = Driver;

    fn deref(&self) -> &Self::Target {
        &self.driver
    }
}

/// Runs a test with an in-memory harness.
///
/// # Example
///
/// ```rust,ignore
/// use serialprobe_testkit::with_harness;
///
/// #[test]
/// fn my_test() {
///     with_harness(|h| {
///         let trace = h.non_repeatable_read_probe(&test_resource(), NodeId::new(1), level)?;
///     });
/// }
/// ```
pub fn with_harness<F, R>(f: F) -> R
where
    F: FnOnce(&TestHarness) -> R,
{
    let harness = TestHarness::memory();
    f(&harness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_nodes_are_seeded() {
        let fixture = TestCluster::three_nodes();
        assert_eq!(fixture.cluster.len(), 3);
        assert!(fixture.is_at_baseline());
        assert_eq!(fixture.node(2).node_id(), NodeId::new(2));
    }

    #[test]
    fn fast_config_is_valid() {
        fast_config().validate().unwrap();
        assert!(fast_dwell().longest() < fast_config().lease);
    }

    #[test]
    fn file_locked_harness_has_dir() {
        let harness = TestHarness::file_locked();
        assert!(harness.dir().unwrap().is_dir());
        assert_eq!(harness.locks().owner(), "case3_test");
    }
}
