//! Stress tests for the lock manager.
//!
//! These helpers hammer one lock family from many threads and measure how
//! many holders were ever inside the critical section at once.

use serialprobe_core::{LockManager, Resource};
use serialprobe_store::NodeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total attempts.
    pub total_ops: usize,
    /// Attempts that acquired.
    pub successful_ops: usize,
    /// Attempts that timed out or failed.
    pub failed_ops: usize,
    /// Highest number of simultaneous holders observed.
    pub max_holders: usize,
    /// Total duration.
    pub duration: Duration,
    /// Attempts per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, max_holders: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            max_holders,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total attempts: {}", self.total_ops);
        println!("Acquired: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Max simultaneous holders: {}", self.max_holders);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Competing holders.
    pub threads: usize,
    /// Acquisitions attempted per holder.
    pub rounds: usize,
    /// Time spent inside the critical section.
    pub hold: Duration,
    /// Acquisition timeout per attempt.
    pub timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 6,
            rounds: 20,
            hold: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Tracks how many holders are inside a critical section.
#[derive(Debug, Default)]
pub struct OccupancyCounter {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl OccupancyCounter {
    /// Marks one holder entering.
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    /// Marks one holder leaving.
    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns the highest occupancy seen.
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Races `config.threads` holders for `resource` at `node`.
///
/// Each holder derives its own identity from `base` and enters the
/// critical section only while holding the lock.
pub fn stress_exclusion(
    base: &LockManager,
    resource: &Resource,
    node: NodeId,
    config: &StressConfig,
) -> StressTestResult {
    let counter = Arc::new(OccupancyCounter::default());
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|s| {
        for t in 0..config.threads {
            let manager = base.with_owner(format!("{}/stress-{t}", base.owner()));
            let counter = Arc::clone(&counter);
            let (successful, failed) = (&successful, &failed);
            s.spawn(move || {
                for _ in 0..config.rounds {
                    match manager.lock(resource, node, config.timeout) {
                        Ok(Some(guard)) => {
                            counter.enter();
                            thread::sleep(config.hold);
                            counter.leave();
                            guard.release().expect("Failed to release lock");
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) | Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        counter.max(),
        start.elapsed(),
    )
}

/// Races holders calling `acquire_all` over node sets in opposite orders.
///
/// Holder `t` passes `nodes` reversed when `t` is odd.
pub fn stress_acquire_all(
    base: &LockManager,
    resource: &Resource,
    nodes: &[NodeId],
    config: &StressConfig,
) -> StressTestResult {
    let counter = Arc::new(OccupancyCounter::default());
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|s| {
        for t in 0..config.threads {
            let manager = base.with_owner(format!("{}/multi-{t}", base.owner()));
            let mut order = nodes.to_vec();
            if t % 2 == 1 {
                order.reverse();
            }
            let counter = Arc::clone(&counter);
            let (successful, failed) = (&successful, &failed);
            s.spawn(move || {
                for _ in 0..config.rounds {
                    match manager.lock_all(resource, &order, config.timeout) {
                        Ok(Some(guard)) => {
                            counter.enter();
                            thread::sleep(config.hold);
                            counter.leave();
                            guard.release().expect("Failed to release locks");
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) | Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        counter.max(),
        start.elapsed(),
    )
}
