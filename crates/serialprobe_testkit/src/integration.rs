//! Cross-crate integration test helpers.
//!
//! Provides a probe matrix over every isolation level and helpers for
//! reading JSON-lines reports back.

use serialprobe_core::{Anomaly, AnomalyDetector, Driver, ProbeResult, Resource, WriterEnding};
use serialprobe_store::{IsolationLevel, NodeId};
use std::path::Path;

/// What the probes found at one isolation level.
#[derive(Debug, Clone)]
pub struct ProbeRow {
    /// Level probed.
    pub isolation: IsolationLevel,
    /// Anomalies from the dirty-read probe.
    pub dirty_reads: Vec<Anomaly>,
    /// Anomalies from the non-repeatable-read probe.
    pub non_repeatable_reads: Vec<Anomaly>,
}

impl ProbeRow {
    /// Returns anomalies the level forbids.
    pub fn violations(&self) -> Vec<&Anomaly> {
        self.dirty_reads
            .iter()
            .chain(&self.non_repeatable_reads)
            .filter(|a| a.is_violation())
            .collect()
    }
}

/// Runs both read probes at every isolation level on `node`.
///
/// # Errors
///
/// Returns the first probe error.
pub fn probe_matrix(driver: &Driver, resource: &Resource, node: NodeId) -> ProbeResult<Vec<ProbeRow>> {
    let detector = AnomalyDetector::from_config(driver.config());
    IsolationLevel::ALL
        .iter()
        .map(|&isolation| {
            let dirty = driver.dirty_read_probe(resource, node, isolation, WriterEnding::Commit)?;
            let reread = driver.non_repeatable_read_probe(resource, node, isolation)?;
            Ok(ProbeRow {
                isolation,
                dirty_reads: detector.dirty_reads(&dirty),
                non_repeatable_reads: detector.non_repeatable_reads(&reread),
            })
        })
        .collect()
}

/// Reads a JSON-lines report into values, one per line.
///
/// # Panics
///
/// Panics if the file cannot be read or a line is not JSON.
pub fn read_report_lines(path: &Path) -> Vec<serde_json::Value> {
    let text = std::fs::read_to_string(path).expect("Failed to read report");
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("Report line is not JSON"))
        .collect()
}

/// Returns report lines whose `record` tag equals `kind`.
pub fn records_of<'a>(lines: &'a [serde_json::Value], kind: &str) -> Vec<&'a serde_json::Value> {
    lines
        .iter()
        .filter(|line| line.get("record").and_then(|r| r.as_str()) == Some(kind))
        .collect()
}
