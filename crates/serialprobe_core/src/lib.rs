//! # SerialProbe Core
//!
//! Concurrency harness that checks whether concurrent operations on one
//! logical record, spread over independent database nodes, behave like some
//! serial execution under each isolation level.
//!
//! This crate provides:
//! - A distributed lock manager ([`LockManager`]) with pluggable lock tables
//! - A timed transaction driver ([`Driver`]) running Workers concurrently or
//!   sequentially, plus dirty-read and non-repeatable-read probes
//! - A serializability oracle ([`SerializabilityOracle`]) comparing the two
//!   modes and flagging lost updates
//! - An anomaly detector ([`AnomalyDetector`]) classifying phenomena against
//!   what each isolation level permits
//! - Report sinks ([`ReportSink`]) for steps, anomalies and runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use serialprobe_core::{Driver, HarnessConfig, Resource, Scenario, SerializabilityOracle};
//! use serialprobe_store::IsolationLevel;
//!
//! let driver = Driver::in_memory(cluster, HarnessConfig::default());
//! let report = SerializabilityOracle::new(&driver).verify(
//!     &Resource::trans(60),
//!     &Scenario::UpdateOnly.workers(),
//!     IsolationLevel::Serializable,
//! )?;
//! println!("{:?}", report.verdict);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod detector;
pub mod driver;
mod error;
pub mod lock;
pub mod oracle;
pub mod report;
mod stats;
mod types;
pub mod workload;

pub use config::{DwellConfig, HarnessConfig, ProbeConfig};
pub use detector::{permits, Anomaly, AnomalyDetector, Phenomenon};
pub use driver::{
    Driver, ExecutionMode, ExecutionRun, FailureCategory, Operation, ProbeTrace, ReadSample,
    ReaderTrace, RunSummary, WorkerOutcome, WorkerSpec, WorkerStatus, WriterEnding, WriterTrace,
};
pub use error::{ProbeError, ProbeResult};
#[cfg(feature = "std")]
pub use lock::FileLockTable;
pub use lock::{
    LockEntry, LockGuard, LockKey, LockManager, LockOptions, LockTable, MemoryLockTable,
    MultiLockGuard,
};
pub use oracle::{LostUpdate, OracleReport, SerializabilityOracle, StateMismatch, Verdict};
pub use report::{JsonLinesSink, MemorySink, ReportSink, Step, StepRecord, TracingSink};
pub use stats::{LockStats, LockStatsSnapshot};
pub use types::{NodeConfig, NodeRole, Resource};
pub use workload::Scenario;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
