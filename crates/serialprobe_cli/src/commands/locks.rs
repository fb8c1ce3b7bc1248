//! Locks command implementation.

use super::{GlobalOptions, OutputFormat};
use serde::Serialize;
use serialprobe_core::{
    FileLockTable, LockManager, LockStatsSnapshot, LockTable, MemoryLockTable, Resource,
};
use serialprobe_store::NodeId;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// What one caller experienced.
#[derive(Debug, Serialize)]
pub struct CallerResult {
    /// Holder identity.
    pub owner: String,
    /// Node order the caller passed.
    pub order: Vec<NodeId>,
    /// True if every lock was granted.
    pub acquired: bool,
    /// Time spent inside `acquire_all`.
    pub waited_ms: u64,
}

/// Outcome of the race.
#[derive(Debug, Serialize)]
pub struct LockRaceResult {
    /// Resource both callers locked.
    pub resource: String,
    /// Per-caller results.
    pub callers: Vec<CallerResult>,
    /// Time until both callers finished.
    pub elapsed_ms: u64,
    /// Lock manager counters.
    pub stats: LockStatsSnapshot,
}

/// Runs the locks command.
pub fn run(
    options: &GlobalOptions,
    hold_ms: u64,
    timeout_ms: u64,
    table: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.harness_config()?;
    let table: Arc<dyn LockTable> = match table {
        Some(path) => Arc::new(FileLockTable::open(path)?),
        None => Arc::new(MemoryLockTable::new()),
    };
    let base = LockManager::new(table, config.owner.clone(), config.lock_options());
    let resource = Resource::trans(60);
    let hold = Duration::from_millis(hold_ms);
    let timeout = Duration::from_millis(timeout_ms);
    let orders = [
        vec![NodeId::new(1), NodeId::new(2)],
        vec![NodeId::new(2), NodeId::new(1)],
    ];

    let barrier = Barrier::new(orders.len());
    let started = Instant::now();
    let callers = thread::scope(|s| {
        let handles: Vec<_> = orders
            .into_iter()
            .map(|order| {
                let manager = base.with_owner(LockManager::unique_owner(&config.owner));
                let (barrier, resource) = (&barrier, &resource);
                s.spawn(move || -> Result<CallerResult, String> {
                    barrier.wait();
                    let start = Instant::now();
                    let guard = manager
                        .lock_all(resource, &order, timeout)
                        .map_err(|e| e.to_string())?;
                    let waited = start.elapsed();
                    let acquired = guard.is_some();
                    if let Some(guard) = guard {
                        thread::sleep(hold);
                        guard.release().map_err(|e| e.to_string())?;
                    }
                    Ok(CallerResult {
                        owner: manager.owner().to_string(),
                        order,
                        acquired,
                        waited_ms: waited.as_millis() as u64,
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "lock caller panicked".to_string())?)
            .collect::<Result<Vec<_>, String>>()
    })?;

    let result = LockRaceResult {
        resource: resource.to_string(),
        callers,
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats: base.stats().snapshot(),
    };

    match options.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => print_text_output(&result, hold, timeout),
    }

    Ok(())
}

fn print_text_output(result: &LockRaceResult, hold: Duration, timeout: Duration) {
    println!(
        "Lock race on {} (hold {:?}, timeout {:?})",
        result.resource, hold, timeout
    );
    for caller in &result.callers {
        let order: Vec<String> = caller.order.iter().map(ToString::to_string).collect();
        println!(
            "  {} [{}]: {} after {} ms",
            caller.owner,
            order.join(", "),
            if caller.acquired { "acquired" } else { "timed out" },
            caller.waited_ms
        );
    }
    println!("  finished in {} ms", result.elapsed_ms);
    println!(
        "  acquired {}, timed out {}, released {}, partial rollbacks {}",
        result.stats.acquired, result.stats.timed_out, result.stats.released, result.stats.rollbacks
    );
}
