//! Result reporting.
//!
//! The driver and detector emit three kinds of records:
//!
//! - a [`StepRecord`] for every protocol step of every Worker
//! - an [`Anomaly`] for every classified phenomenon
//! - a finished [`ExecutionRun`] at the end of every run
//!
//! Sinks are fire-and-forget. A sink that cannot persist a record logs the
//! problem and carries on; reporting never fails a run.
//!
//! # Usage
//!
//! ```rust,ignore
//! use serialprobe_core::{Driver, JsonLinesSink};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(JsonLinesSink::create("results.jsonl")?);
//! let driver = Driver::in_memory(cluster, config).with_sink(sink);
//! ```

use crate::config::millis;
use crate::detector::Anomaly;
use crate::driver::{ExecutionRun, RunSummary};
use crate::error::ProbeResult;
use parking_lot::Mutex;
use serde::Serialize;
use serialprobe_store::{IsolationLevel, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// DLM lock granted.
    LockAcquired,
    /// DLM lock not granted in time.
    LockDenied,
    /// Native transaction opened.
    Begin,
    /// Value read.
    Read,
    /// Update or delete applied.
    Mutate,
    /// Dwell started.
    Dwell,
    /// Value read again after mutating.
    ReadBack,
    /// Committed.
    Commit,
    /// Rolled back.
    Rollback,
    /// DLM lock released.
    LockReleased,
    /// DLM lock found missing or expired.
    LockLost,
}

/// One protocol step of one Worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// Worker identity.
    pub worker: String,
    /// Target node.
    pub node: NodeId,
    /// Resource lock name.
    pub resource: String,
    /// Transaction isolation level.
    pub isolation: IsolationLevel,
    /// What happened.
    pub step: Step,
    /// Offset from the start of the run.
    #[serde(with = "millis")]
    pub at: Duration,
    /// Amount read or written, if any.
    pub amount: Option<f64>,
    /// Free-form detail.
    pub detail: Option<String>,
}

/// Receives report records.
///
/// Implementations must not block the caller for long; Workers call
/// `log_step` from inside open transactions.
pub trait ReportSink: Send + Sync {
    /// Records one protocol step.
    fn log_step(&self, step: &StepRecord);

    /// Records one anomaly.
    fn log_anomaly(&self, anomaly: &Anomaly);

    /// Records a finished run.
    fn end_run(&self, run: &ExecutionRun);
}

/// Forwards records into the `tracing` log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn log_step(&self, step: &StepRecord) {
        debug!(
            worker = %step.worker,
            node = %step.node,
            resource = %step.resource,
            step = ?step.step,
            at_ms = step.at.as_millis() as u64,
            amount = ?step.amount,
            detail = step.detail.as_deref().unwrap_or(""),
            "step"
        );
    }

    fn log_anomaly(&self, anomaly: &Anomaly) {
        if anomaly.expected {
            info!(phenomenon = %anomaly.phenomenon, isolation = %anomaly.isolation, workers = ?anomaly.workers, "{}", anomaly.description);
        } else {
            warn!(phenomenon = %anomaly.phenomenon, isolation = %anomaly.isolation, workers = ?anomaly.workers, "unexpected anomaly: {}", anomaly.description);
        }
    }

    fn end_run(&self, run: &ExecutionRun) {
        let summary = run.summary();
        info!(
            resource = %run.resource,
            isolation = %run.isolation,
            mode = %run.mode,
            successes = summary.successes,
            failed = summary.failed(),
            throughput = summary.throughput,
            success_rate = summary.success_rate,
            "run complete"
        );
        if !run.is_restored() {
            warn!(resource = %run.resource, nodes = ?run.unrestored, "baseline not restored");
        }
    }
}

/// Keeps every record in memory; used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemorySink {
    steps: Mutex<Vec<StepRecord>>,
    anomalies: Mutex<Vec<Anomaly>>,
    runs: Mutex<Vec<ExecutionRun>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded steps.
    #[must_use]
    pub fn steps(&self) -> Vec<StepRecord> {
        self.steps.lock().clone()
    }

    /// Returns the recorded steps of one Worker.
    #[must_use]
    pub fn steps_of(&self, worker: &str) -> Vec<StepRecord> {
        self.steps
            .lock()
            .iter()
            .filter(|s| s.worker == worker)
            .cloned()
            .collect()
    }

    /// Returns the recorded anomalies.
    #[must_use]
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.lock().clone()
    }

    /// Returns the recorded runs.
    #[must_use]
    pub fn runs(&self) -> Vec<ExecutionRun> {
        self.runs.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn log_step(&self, step: &StepRecord) {
        self.steps.lock().push(step.clone());
    }

    fn log_anomaly(&self, anomaly: &Anomaly) {
        self.anomalies.lock().push(anomaly.clone());
    }

    fn end_run(&self, run: &ExecutionRun) {
        self.runs.lock().push(run.clone());
    }
}

/// One line of a JSON-lines report.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum ReportLine<'a> {
    Step(&'a StepRecord),
    Anomaly(&'a Anomaly),
    Run {
        resource: &'a str,
        isolation: IsolationLevel,
        started_at_ms: u64,
        summary: RunSummary,
        final_states: &'a BTreeMap<NodeId, Option<f64>>,
        #[serde(skip_serializing_if = "no_nodes")]
        uncaptured: &'a BTreeSet<NodeId>,
        #[serde(skip_serializing_if = "no_nodes")]
        unrestored: &'a BTreeSet<NodeId>,
        outcomes: &'a [crate::driver::WorkerOutcome],
    },
}

fn no_nodes(nodes: &&BTreeSet<NodeId>) -> bool {
    nodes.is_empty()
}

/// Appends records to a JSON-lines file from a background thread.
///
/// Records are encoded on the caller's thread and handed over a channel, so
/// Workers never wait on file I/O. Dropping the sink flushes and joins the
/// writer thread.
#[derive(Debug)]
pub struct JsonLinesSink {
    sender: Mutex<Option<Sender<String>>>,
    writer: Option<JoinHandle<usize>>,
}

impl JsonLinesSink {
    /// Creates (or truncates) the report file and starts the writer thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the thread cannot
    /// be spawned.
    pub fn create(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let file = File::create(path.as_ref())?;
        let (sender, receiver) = mpsc::channel::<String>();
        let writer = thread::Builder::new()
            .name("report-writer".into())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                let mut written = 0;
                for line in receiver {
                    if let Err(e) = writeln!(out, "{line}") {
                        warn!(error = %e, "failed to write report line");
                        continue;
                    }
                    written += 1;
                }
                if let Err(e) = out.flush() {
                    warn!(error = %e, "failed to flush report");
                }
                written
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer: Some(writer),
        })
    }

    fn send(&self, line: &ReportLine<'_>) {
        let encoded = match serde_json::to_string(line) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode report line");
                return;
            }
        };
        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send(encoded).is_err() {
                warn!("report writer has stopped");
            }
        }
    }

    /// Flushes outstanding records and stops the writer thread.
    ///
    /// Returns the number of lines written.
    pub fn finish(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        self.sender.lock().take();
        match self.writer.take().map(JoinHandle::join) {
            Some(Ok(written)) => written,
            Some(Err(_)) => {
                warn!("report writer panicked");
                0
            }
            None => 0,
        }
    }
}

impl ReportSink for JsonLinesSink {
    fn log_step(&self, step: &StepRecord) {
        self.send(&ReportLine::Step(step));
    }

    fn log_anomaly(&self, anomaly: &Anomaly) {
        self.send(&ReportLine::Anomaly(anomaly));
    }

    fn end_run(&self, run: &ExecutionRun) {
        self.send(&ReportLine::Run {
            resource: run.resource.name(),
            isolation: run.isolation,
            started_at_ms: run.started_at_ms,
            summary: run.summary(),
            final_states: &run.final_states,
            uncaptured: &run.uncaptured,
            unrestored: &run.unrestored,
            outcomes: &run.outcomes,
        });
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
