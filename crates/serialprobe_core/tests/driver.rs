//! Driver integration tests against in-memory nodes.

use serialprobe_core::workload::READ_WRITE_AMOUNT;
use serialprobe_core::{
    Driver, ExecutionMode, FailureCategory, HarnessConfig, LockEntry, LockKey, LockManager,
    LockTable, MemoryLockTable, MemorySink, ProbeError, ProbeResult, Resource, Scenario, Step,
    WorkerSpec,
};
use serialprobe_store::{Cluster, IsolationLevel, MemoryNode, NodeId, NodeStore, RowId};
use std::sync::Arc;
use std::time::Duration;

const ROW: i64 = 60;

fn config() -> HarnessConfig {
    HarnessConfig::default()
        .lease(Duration::from_secs(10))
        .lock_timeout(Duration::from_secs(5))
        .poll_interval(Duration::from_millis(2))
        .dwell(Duration::from_millis(20), Duration::from_millis(10))
        .stagger(Duration::from_millis(2))
}

fn nodes() -> Vec<MemoryNode> {
    (1..=3)
        .map(|id| {
            let node = MemoryNode::with_lock_wait_timeout(NodeId::new(id), Duration::from_secs(5));
            node.seed(serialprobe_store::RowId::new(ROW), 1000.0);
            node
        })
        .collect()
}

fn cluster(nodes: &[MemoryNode]) -> Cluster {
    nodes.iter().fold(Cluster::new(), |cluster, node| {
        cluster.with_node(Arc::new(node.clone()) as Arc<dyn NodeStore>)
    })
}

fn amount_of(workers: &[WorkerSpec], name: &str) -> f64 {
    match workers.iter().find(|w| w.name == name).map(|w| w.operation) {
        Some(serialprobe_core::Operation::Update { amount }) => amount,
        other => panic!("{name} is not an update: {other:?}"),
    }
}

#[test]
fn sequential_run_ends_with_last_writer_per_node() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = Scenario::UpdateOnly.workers();
    let resource = Resource::trans(ROW);

    let run = driver
        .run(&resource, &workers, IsolationLevel::RepeatableRead, ExecutionMode::Sequential)
        .unwrap();

    assert_eq!(run.outcomes.len(), workers.len());
    assert!(run.outcomes.iter().all(|o| o.is_success()));
    assert_eq!(run.final_state(NodeId::new(1)), Some(Some(amount_of(&workers, "T4"))));
    assert_eq!(run.final_state(NodeId::new(2)), Some(Some(amount_of(&workers, "T8"))));
    assert_eq!(run.final_state(NodeId::new(3)), Some(Some(amount_of(&workers, "T10"))));
    assert_eq!(run.last_committer().unwrap().worker, "T10");
    assert!(!run.summary().ran_concurrently());

    for node in &nodes {
        assert_eq!(node.committed_amount(resource.row()), Some(1000.0));
        assert_eq!(node.active_transactions(), 0);
    }
}

#[test]
fn outcomes_follow_worker_order_in_concurrent_mode() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = Scenario::UpdateOnly.workers();

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::Serializable, ExecutionMode::Concurrent)
        .unwrap();

    let names: Vec<_> = run.outcomes.iter().map(|o| o.worker.as_str()).collect();
    let expected: Vec<_> = workers.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, expected);
    assert!(run.outcomes.iter().all(|o| o.is_success()), "{:?}", run.outcomes);
    assert_eq!(driver.locks().stats().snapshot().outstanding(), 0);
}

#[test]
fn mixed_sequential_run_leaves_deleted_rows() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = Scenario::Mixed.workers();

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .unwrap();

    assert_eq!(run.final_state(NodeId::new(1)), Some(None));
    assert_eq!(run.final_state(NodeId::new(2)), Some(None));
    assert!(run.final_state(NodeId::new(3)).unwrap().is_some());
    let t4 = run.outcomes.iter().find(|o| o.worker == "T4").unwrap();
    assert!(t4.is_success());
    assert_eq!(t4.after, None);

    // Baseline restore re-creates deleted rows.
    assert_eq!(nodes[0].committed_amount(serialprobe_store::RowId::new(ROW)), Some(1000.0));
}

#[test]
fn missing_row_is_resource_not_found() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = vec![WorkerSpec::update("T1", NodeId::new(1), 5.0)];

    let run = driver
        .run(&Resource::trans(61), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .unwrap();

    assert_eq!(run.outcomes[0].failure(), Some(FailureCategory::ResourceNotFound));
}

#[test]
fn held_lock_times_out_worker() {
    let nodes = nodes();
    let driver = Driver::in_memory(
        cluster(&nodes),
        config().lock_timeout(Duration::from_millis(30)),
    );
    let resource = Resource::trans(ROW);
    let intruder = driver.locks().with_owner("intruder");
    assert!(intruder.acquire(&resource, NodeId::new(1), Duration::ZERO).unwrap());

    let workers = vec![
        WorkerSpec::update("T1", NodeId::new(1), 5.0),
        WorkerSpec::update("T5", NodeId::new(2), 6.0),
    ];
    let run = driver
        .run(&resource, &workers, IsolationLevel::ReadCommitted, ExecutionMode::Concurrent)
        .unwrap();

    assert_eq!(run.outcomes[0].failure(), Some(FailureCategory::DistributedLockTimeout));
    assert!(run.outcomes[1].is_success());
    assert_eq!(run.final_state(NodeId::new(1)), Some(Some(1000.0)));
    assert!(intruder.still_held(&resource, NodeId::new(1)).unwrap());
}

#[test]
fn unknown_node_is_rejected_before_running() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = vec![WorkerSpec::update("T1", NodeId::new(9), 5.0)];
    let err = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .unwrap_err();
    assert!(matches!(err, ProbeError::InvalidWorkload { .. }));
}

#[test]
fn duplicate_worker_names_are_rejected() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = vec![
        WorkerSpec::update("T1", NodeId::new(1), 5.0),
        WorkerSpec::update("T1", NodeId::new(2), 6.0),
    ];
    assert!(driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .is_err());
}

#[test]
fn unavailable_node_does_not_abort_the_run() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    nodes[1].set_available(false);
    let workers = vec![
        WorkerSpec::update("T1", NodeId::new(1), 12111.11),
        WorkerSpec::update("T5", NodeId::new(2), 16555.55),
    ];

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .unwrap();

    assert_eq!(run.outcomes.len(), 2);
    assert!(run.outcomes[0].is_success());
    assert_eq!(run.outcomes[1].failure(), Some(FailureCategory::Other));
    let summary = run.summary();
    assert_eq!(summary.successes, 1);
    assert_eq!(summary.failures.get(&FailureCategory::Other), Some(&1));

    assert_eq!(run.final_state(NodeId::new(1)), Some(Some(12111.11)));
    assert_eq!(run.final_state(NodeId::new(2)), None);
    assert!(run.uncaptured.contains(&NodeId::new(2)));
    assert_eq!(run.unrestored.iter().copied().collect::<Vec<_>>(), [NodeId::new(2)]);
    assert!(!run.is_restored());
}

#[test]
fn healthy_nodes_return_to_baseline_when_a_node_fails() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    nodes[2].set_available(false);
    let workers = vec![
        WorkerSpec::update("T1", NodeId::new(1), 12111.11),
        WorkerSpec::update("T5", NodeId::new(2), 16555.55),
        WorkerSpec::update("T9", NodeId::new(3), 20999.99),
    ];

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::Serializable, ExecutionMode::Concurrent)
        .unwrap();

    assert_eq!(run.summary().successes, 2);
    assert_eq!(run.outcomes[2].failure(), Some(FailureCategory::Other));
    let row = RowId::new(ROW);
    assert_eq!(nodes[0].committed_amount(row), Some(1000.0));
    assert_eq!(nodes[1].committed_amount(row), Some(1000.0));

    nodes[2].set_available(true);
    assert_eq!(nodes[2].committed_amount(row), Some(1000.0));
    driver.restore_baseline(&Resource::trans(ROW)).unwrap();
}

#[test]
fn steps_follow_the_write_protocol() {
    let nodes = nodes();
    let sink = Arc::new(MemorySink::new());
    let driver = Driver::in_memory(cluster(&nodes), config()).with_sink(sink.clone());
    let workers = vec![WorkerSpec::update("T1", NodeId::new(1), 12111.11)];

    driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::Serializable, ExecutionMode::Sequential)
        .unwrap();

    let steps: Vec<Step> = sink.steps_of("T1").into_iter().map(|s| s.step).collect();
    assert_eq!(
        steps,
        vec![
            Step::LockAcquired,
            Step::Begin,
            Step::Read,
            Step::Mutate,
            Step::Dwell,
            Step::ReadBack,
            Step::Commit,
            Step::LockReleased,
        ]
    );
    assert_eq!(sink.runs().len(), 1);
}

#[test]
fn read_worker_takes_no_distributed_lock() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let resource = Resource::trans(ROW);
    let intruder = driver.locks().with_owner("intruder");
    assert!(intruder.acquire(&resource, NodeId::new(1), Duration::ZERO).unwrap());

    let workers = vec![WorkerSpec::read("R1", NodeId::new(1))];
    let run = driver
        .run(&resource, &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .unwrap();

    let outcome = &run.outcomes[0];
    assert!(outcome.is_success());
    assert_eq!(outcome.before, Some(1000.0));
    assert_eq!(outcome.after, Some(1000.0));
}

#[test]
fn concurrent_reads_see_the_baseline_on_every_node() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = Scenario::ConcurrentReads.workers();

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::RepeatableRead, ExecutionMode::Concurrent)
        .unwrap();

    assert_eq!(run.outcomes.len(), 3);
    for outcome in &run.outcomes {
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(outcome.before, Some(1000.0));
        assert_eq!(outcome.after, Some(1000.0));
    }
    assert_eq!(driver.locks().stats().acquired(), 0);
    assert!(run.final_states.values().all(|state| *state == Some(1000.0)));
    assert!(run.last_committer().is_none());
}

#[test]
fn read_write_scenario_changes_only_the_writer_node() {
    let nodes = nodes();
    let driver = Driver::in_memory(cluster(&nodes), config());
    let workers = Scenario::ReadWrite.workers();

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Concurrent)
        .unwrap();

    assert_eq!(run.summary().successes, 3);
    let writer = &run.outcomes[0];
    assert_eq!(writer.worker, "W1");
    assert_eq!(writer.before, Some(1000.0));
    assert_eq!(writer.after, Some(READ_WRITE_AMOUNT));
    for reader in &run.outcomes[1..] {
        assert_eq!((reader.before, reader.after), (Some(1000.0), Some(1000.0)));
    }
    assert_eq!(run.final_state(NodeId::new(1)), Some(Some(READ_WRITE_AMOUNT)));
    assert_eq!(run.final_state(NodeId::new(2)), Some(Some(1000.0)));
    assert_eq!(run.last_committer().map(|o| o.worker.as_str()), Some("W1"));
    assert_eq!(driver.locks().stats().acquired(), 1);
    assert_eq!(nodes[0].committed_amount(RowId::new(ROW)), Some(1000.0));
}

/// Grants every lock but never reports it as held.
#[derive(Default)]
struct AmnesiacTable;

impl LockTable for AmnesiacTable {
    fn insert_if_absent(&self, _: &LockKey, _: LockEntry, _: u64) -> ProbeResult<bool> {
        Ok(true)
    }

    fn delete_if_owned(&self, _: &LockKey, _: &str) -> ProbeResult<bool> {
        Ok(false)
    }

    fn read(&self, _: &LockKey) -> ProbeResult<Option<LockEntry>> {
        Ok(None)
    }

    fn delete_all_owned(&self, _: &str) -> ProbeResult<Vec<LockKey>> {
        Ok(Vec::new())
    }
}

/// A lock table whose per-key release always fails.
struct StickyTable(MemoryLockTable);

impl LockTable for StickyTable {
    fn insert_if_absent(&self, key: &LockKey, entry: LockEntry, now_ms: u64) -> ProbeResult<bool> {
        self.0.insert_if_absent(key, entry, now_ms)
    }

    fn delete_if_owned(&self, _: &LockKey, _: &str) -> ProbeResult<bool> {
        Err(ProbeError::lock_table("release refused"))
    }

    fn read(&self, key: &LockKey) -> ProbeResult<Option<LockEntry>> {
        self.0.read(key)
    }

    fn delete_all_owned(&self, owner: &str) -> ProbeResult<Vec<LockKey>> {
        self.0.delete_all_owned(owner)
    }
}

#[test]
fn leftover_worker_locks_are_swept_after_the_run() {
    let nodes = nodes();
    let config = config();
    let table = Arc::new(StickyTable(MemoryLockTable::new()));
    let locks = LockManager::new(table.clone(), "case3_test", config.lock_options());
    let driver = Driver::new(cluster(&nodes), locks, config);
    let resource = Resource::trans(ROW);
    let workers = vec![
        WorkerSpec::update("T1", NodeId::new(1), 12111.11),
        WorkerSpec::update("T5", NodeId::new(2), 16555.55),
    ];

    let run = driver
        .run(&resource, &workers, IsolationLevel::ReadCommitted, ExecutionMode::Concurrent)
        .unwrap();

    assert_eq!(run.outcomes.len(), 2);
    for node in [1, 2] {
        assert!(table.read(&LockKey::new(&resource, NodeId::new(node))).unwrap().is_none());
    }
    assert_eq!(driver.locks().stats().swept(), 2);
    assert!(run.is_restored());
    assert_eq!(nodes[0].committed_amount(RowId::new(ROW)), Some(1000.0));
}

#[test]
fn lost_lock_aborts_before_mutation() {
    let nodes = nodes();
    let config = config();
    let locks = LockManager::new(Arc::new(AmnesiacTable), "case3_test", config.lock_options());
    let driver = Driver::new(cluster(&nodes), locks, config);
    let workers = vec![WorkerSpec::update("T1", NodeId::new(1), 12111.11)];

    let run = driver
        .run(&Resource::trans(ROW), &workers, IsolationLevel::ReadCommitted, ExecutionMode::Sequential)
        .unwrap();

    assert_eq!(run.outcomes[0].failure(), Some(FailureCategory::LostLock));
    assert_eq!(run.final_state(NodeId::new(1)), Some(Some(1000.0)));
}
