//! Lock managers sharing one file-backed lock table.

#![cfg(feature = "std")]

use serialprobe_core::{FileLockTable, LockManager, LockOptions, Resource};
use serialprobe_store::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn manager(dir: &TempDir, owner: &str, lease: Duration) -> LockManager {
    let table = FileLockTable::open(dir.path().join("locks.json")).unwrap();
    LockManager::new(
        Arc::new(table),
        owner,
        LockOptions::new()
            .lease(lease)
            .poll_interval(Duration::from_millis(2)),
    )
}

#[test]
fn separate_tables_on_one_file_exclude_each_other() {
    let dir = TempDir::new().unwrap();
    let a = manager(&dir, "host-a", Duration::from_secs(30));
    let b = manager(&dir, "host-b", Duration::from_secs(30));
    let resource = Resource::trans(60);
    let nodes = [NodeId::new(1), NodeId::new(2), NodeId::new(3)];

    assert!(a.acquire_all(&resource, &nodes, Duration::ZERO).unwrap());
    assert!(!b
        .acquire(&resource, NodeId::new(2), Duration::from_millis(20))
        .unwrap());

    a.release_all(&resource, &nodes).unwrap();
    assert!(b.acquire(&resource, NodeId::new(2), Duration::ZERO).unwrap());
    assert!(!a.still_held(&resource, NodeId::new(2)).unwrap());
    assert!(b.still_held(&resource, NodeId::new(2)).unwrap());
}

#[test]
fn expired_lease_in_file_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let a = manager(&dir, "host-a", Duration::from_millis(10));
    let b = manager(&dir, "host-b", Duration::from_secs(30));
    let resource = Resource::trans(60);

    assert!(a.acquire(&resource, NodeId::new(1), Duration::ZERO).unwrap());
    std::thread::sleep(Duration::from_millis(30));
    assert!(!a.still_held(&resource, NodeId::new(1)).unwrap());
    assert!(b.acquire(&resource, NodeId::new(1), Duration::ZERO).unwrap());
}

#[test]
fn sweep_clears_only_own_entries() {
    let dir = TempDir::new().unwrap();
    let a = manager(&dir, "host-a", Duration::from_secs(30));
    let b = manager(&dir, "host-b", Duration::from_secs(30));
    let resource = Resource::trans(60);

    assert!(a.acquire(&resource, NodeId::new(1), Duration::ZERO).unwrap());
    assert!(a.acquire(&resource, NodeId::new(2), Duration::ZERO).unwrap());
    assert!(b.acquire(&resource, NodeId::new(3), Duration::ZERO).unwrap());

    assert_eq!(a.release_everything_owned().unwrap(), 2);
    assert!(b.still_held(&resource, NodeId::new(3)).unwrap());
}
