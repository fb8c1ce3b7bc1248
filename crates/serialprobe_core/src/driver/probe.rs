//! Reader/writer isolation probes.
//!
//! Two experiments produce the traces the anomaly detector classifies:
//!
//! - dirty read: a writer holds an uncommitted update for `writer_hold`; a
//!   reader starts `reader_delay` later and reads once.
//! - non-repeatable read: a reader reads twice, `reread_gap` apart; a modifier
//!   starts `modifier_delay` after the reader and commits an update.
//!
//! Writers and modifiers hold the DLM lock; readers do not. The baseline is
//! restored after each probe.

use super::Driver;
use crate::config::millis;
use crate::error::{ProbeError, ProbeResult};
use crate::report::{Step, StepRecord};
use crate::types::Resource;
use serde::{Deserialize, Serialize};
use serialprobe_store::{IsolationLevel, NodeId, Statement};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

const WRITER: &str = "probe-writer";
const READER: &str = "probe-reader";
const MODIFIER: &str = "probe-modifier";

/// How the dirty-read writer finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterEnding {
    /// Commit after the hold.
    Commit,
    /// Roll back after the hold.
    Rollback,
}

/// What the writing side of a probe did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterTrace {
    /// Writer identity.
    pub worker: String,
    /// Node written.
    pub node: NodeId,
    /// Committed amount the writer read first.
    pub before: Option<f64>,
    /// Amount the writer wrote.
    pub in_flight: f64,
    /// When the write was applied.
    #[serde(with = "millis")]
    pub wrote_at: Duration,
    /// When the writer committed or rolled back.
    #[serde(with = "millis")]
    pub finished_at: Duration,
    /// True if the writer committed.
    pub committed: bool,
}

/// One read by a probe reader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadSample {
    /// When the read returned.
    #[serde(with = "millis")]
    pub at: Duration,
    /// Amount read; `None` if the row was not visible.
    pub amount: Option<f64>,
}

/// What the reading side of a probe observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderTrace {
    /// Reader identity.
    pub worker: String,
    /// Node read.
    pub node: NodeId,
    /// Reader isolation level.
    pub isolation: IsolationLevel,
    /// Reads in order, all inside one transaction.
    pub reads: Vec<ReadSample>,
}

/// Combined trace of one probe. Times share one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeTrace {
    /// Probed resource.
    pub resource: Resource,
    /// Isolation level of both transactions.
    pub isolation: IsolationLevel,
    /// Writing side.
    pub writer: WriterTrace,
    /// Reading side.
    pub reader: ReaderTrace,
}

fn join<T>(handle: ScopedJoinHandle<'_, ProbeResult<T>>, name: &str) -> ProbeResult<T> {
    handle.join().map_err(|_| ProbeError::panicked(name))?
}

/// One side of a probe.
#[derive(Clone, Copy)]
struct Participant<'a> {
    name: &'a str,
    resource: &'a Resource,
    node: NodeId,
    isolation: IsolationLevel,
    origin: Instant,
}

impl Driver {
    /// Runs the dirty-read probe on `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if either side cannot complete, e.g. the writer
    /// cannot take its DLM lock or the row does not exist.
    pub fn dirty_read_probe(
        &self,
        resource: &Resource,
        node: NodeId,
        isolation: IsolationLevel,
        ending: WriterEnding,
    ) -> ProbeResult<ProbeTrace> {
        let probe = self.config().probe;
        let origin = Instant::now();
        let writer = Participant {
            name: WRITER,
            resource,
            node,
            isolation,
            origin,
        };
        let reader = Participant {
            name: READER,
            ..writer
        };
        info!(resource = %resource, %node, %isolation, ?ending, "dirty-read probe starting");

        let result = thread::scope(|s| {
            let writer = s.spawn(|| {
                self.probe_writer(&writer, |base| {
                    (base + probe.write_delta, probe.writer_hold, ending)
                })
            });
            let reader = s.spawn(|| {
                thread::sleep(probe.reader_delay);
                self.probe_reader(&reader, 1, Duration::ZERO)
            });
            let writer = join(writer, WRITER);
            let reader = join(reader, READER);
            Ok::<_, ProbeError>((writer?, reader?))
        });

        self.restore_baseline(resource)?;
        let (writer, reader) = result?;
        Ok(ProbeTrace {
            resource: resource.clone(),
            isolation,
            writer,
            reader,
        })
    }

    /// Runs the non-repeatable-read probe on `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if either side cannot complete.
    pub fn non_repeatable_read_probe(
        &self,
        resource: &Resource,
        node: NodeId,
        isolation: IsolationLevel,
    ) -> ProbeResult<ProbeTrace> {
        let probe = self.config().probe;
        let origin = Instant::now();
        let reader = Participant {
            name: READER,
            resource,
            node,
            isolation,
            origin,
        };
        let modifier = Participant {
            name: MODIFIER,
            ..reader
        };
        info!(resource = %resource, %node, %isolation, "non-repeatable-read probe starting");

        let result = thread::scope(|s| {
            let reader = s.spawn(|| self.probe_reader(&reader, 2, probe.reread_gap));
            let modifier = s.spawn(|| {
                thread::sleep(probe.modifier_delay);
                self.probe_writer(&modifier, |base| {
                    (base + probe.modify_delta, Duration::ZERO, WriterEnding::Commit)
                })
            });
            let reader = join(reader, READER);
            let modifier = join(modifier, MODIFIER);
            Ok::<_, ProbeError>((modifier?, reader?))
        });

        self.restore_baseline(resource)?;
        let (writer, reader) = result?;
        Ok(ProbeTrace {
            resource: resource.clone(),
            isolation,
            writer,
            reader,
        })
    }

    /// Records a step and returns its time.
    fn probe_step(&self, who: &Participant<'_>, step: Step, amount: Option<f64>) -> Duration {
        let at = who.origin.elapsed();
        self.sink().log_step(&StepRecord {
            worker: who.name.to_string(),
            node: who.node,
            resource: who.resource.name().to_string(),
            isolation: who.isolation,
            step,
            at,
            amount,
            detail: None,
        });
        at
    }

    /// Locks, reads, writes the planned amount, holds, then ends as planned.
    fn probe_writer(
        &self,
        who: &Participant<'_>,
        plan: impl FnOnce(f64) -> (f64, Duration, WriterEnding),
    ) -> ProbeResult<WriterTrace> {
        let (resource, node) = (who.resource, who.node);
        let row = resource.row();
        let Some(guard) = self
            .worker_locks(who.name)
            .lock(resource, node, self.config().lock_timeout)?
        else {
            return Err(ProbeError::probe_failed(format!(
                "{} could not lock {resource}@{node}",
                who.name
            )));
        };

        let mut txn = self.cluster().begin(node, who.isolation)?;
        let before = txn.execute(&Statement::select(row))?.first_amount();
        let base = before.ok_or_else(|| {
            ProbeError::probe_failed(format!("row {row} not found on {node}"))
        })?;

        let (in_flight, hold, ending) = plan(base);
        txn.execute(&Statement::update(row, in_flight))?;
        let wrote_at = self.probe_step(who, Step::Mutate, Some(in_flight));

        thread::sleep(hold);
        let committed = match ending {
            WriterEnding::Commit => {
                txn.commit()?;
                true
            }
            WriterEnding::Rollback => {
                txn.rollback()?;
                false
            }
        };
        let step = if committed { Step::Commit } else { Step::Rollback };
        let finished_at = self.probe_step(who, step, None);
        guard.release()?;

        Ok(WriterTrace {
            worker: who.name.to_string(),
            node,
            before,
            in_flight,
            wrote_at,
            finished_at,
            committed,
        })
    }

    fn probe_reader(
        &self,
        who: &Participant<'_>,
        reads: usize,
        gap: Duration,
    ) -> ProbeResult<ReaderTrace> {
        let statement = Statement::select(who.resource.row());
        let mut txn = self.cluster().begin(who.node, who.isolation)?;
        let mut samples = Vec::with_capacity(reads);
        for i in 0..reads {
            if i > 0 {
                thread::sleep(gap);
            }
            let amount = txn.execute(&statement)?.first_amount();
            let at = self.probe_step(who, Step::Read, amount);
            samples.push(ReadSample { at, amount });
        }
        txn.commit()?;

        Ok(ReaderTrace {
            worker: who.name.to_string(),
            node: who.node,
            isolation: who.isolation,
            reads: samples,
        })
    }
}
