//! Read-phenomenon probe tests against in-memory nodes.

use serialprobe_core::{
    AnomalyDetector, Driver, HarnessConfig, Phenomenon, ProbeConfig, Resource, WriterEnding,
};
use serialprobe_store::{Cluster, IsolationLevel, MemoryNode, NodeId, NodeStore, RowId};
use std::sync::Arc;
use std::time::Duration;

fn driver() -> (Driver, MemoryNode) {
    let node = MemoryNode::with_lock_wait_timeout(NodeId::new(1), Duration::from_secs(5));
    node.seed(RowId::new(60), 1000.0);
    let cluster = Cluster::new().with_node(Arc::new(node.clone()) as Arc<dyn NodeStore>);
    let config = HarnessConfig::default()
        .poll_interval(Duration::from_millis(2))
        .lock_timeout(Duration::from_secs(5))
        .jitter(Duration::from_millis(50))
        .probe(ProbeConfig {
            writer_hold: Duration::from_millis(300),
            reader_delay: Duration::from_millis(100),
            reread_gap: Duration::from_millis(200),
            modifier_delay: Duration::from_millis(50),
            ..ProbeConfig::default()
        });
    (Driver::in_memory(cluster, config), node)
}

#[test]
fn read_uncommitted_sees_in_flight_write() {
    let (driver, node) = driver();
    let trace = driver
        .dirty_read_probe(&Resource::trans(60), NodeId::new(1), IsolationLevel::ReadUncommitted, WriterEnding::Commit)
        .unwrap();

    assert_eq!(trace.writer.in_flight, 3000.0);
    assert_eq!(trace.reader.reads[0].amount, Some(3000.0));

    let found = AnomalyDetector::from_config(driver.config()).dirty_reads(&trace);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].phenomenon, Phenomenon::DirtyRead);
    assert!(found[0].expected);

    assert_eq!(node.committed_amount(RowId::new(60)), Some(1000.0));
}

#[test]
fn read_committed_never_sees_rolled_back_write() {
    let (driver, _node) = driver();
    let trace = driver
        .dirty_read_probe(&Resource::trans(60), NodeId::new(1), IsolationLevel::ReadCommitted, WriterEnding::Rollback)
        .unwrap();

    assert!(!trace.writer.committed);
    assert_eq!(trace.reader.reads[0].amount, Some(1000.0));
    assert!(AnomalyDetector::from_config(driver.config()).dirty_reads(&trace).is_empty());
}

#[test]
fn serializable_reader_waits_for_commit() {
    let (driver, _node) = driver();
    let trace = driver
        .dirty_read_probe(&Resource::trans(60), NodeId::new(1), IsolationLevel::Serializable, WriterEnding::Commit)
        .unwrap();

    let read = &trace.reader.reads[0];
    assert_eq!(read.amount, Some(3000.0));
    assert!(read.at + driver.config().jitter >= trace.writer.finished_at);
    assert!(AnomalyDetector::from_config(driver.config()).classify_probe(&trace).is_empty());
}

#[test]
fn read_committed_reread_changes() {
    let (driver, _node) = driver();
    let trace = driver
        .non_repeatable_read_probe(&Resource::trans(60), NodeId::new(1), IsolationLevel::ReadCommitted)
        .unwrap();

    let amounts: Vec<_> = trace.reader.reads.iter().map(|r| r.amount).collect();
    assert_eq!(amounts, vec![Some(1000.0), Some(1500.0)]);

    let found = AnomalyDetector::from_config(driver.config()).non_repeatable_reads(&trace);
    assert_eq!(found.len(), 1);
    assert!(!found[0].is_violation());
}

#[test]
fn repeatable_read_and_serializable_reread_is_stable() {
    for isolation in [IsolationLevel::RepeatableRead, IsolationLevel::Serializable] {
        let (driver, node) = driver();
        let trace = driver
            .non_repeatable_read_probe(&Resource::trans(60), NodeId::new(1), isolation)
            .unwrap();

        let amounts: Vec<_> = trace.reader.reads.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![Some(1000.0), Some(1000.0)], "{isolation}");
        assert!(AnomalyDetector::from_config(driver.config()).non_repeatable_reads(&trace).is_empty());
        assert!(trace.writer.committed);
        assert_eq!(node.committed_amount(RowId::new(60)), Some(1000.0));
    }
}

#[test]
fn probe_on_missing_row_fails() {
    let (driver, _node) = driver();
    assert!(driver
        .dirty_read_probe(&Resource::trans(99), NodeId::new(1), IsolationLevel::ReadCommitted, WriterEnding::Commit)
        .is_err());
}
