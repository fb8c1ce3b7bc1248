//! Probe command implementation.

use super::{amount, parse_levels, CliError, GlobalOptions, OutputFormat};
use serde::Serialize;
use serialprobe_core::{Anomaly, AnomalyDetector, ProbeTrace, Resource, WriterEnding};
use serialprobe_store::{IsolationLevel, NodeId};

/// Both probes at one isolation level.
#[derive(Debug, Serialize)]
pub struct ProbeResult {
    /// Level probed.
    pub isolation: IsolationLevel,
    /// Dirty-read probe trace.
    pub dirty_read: ProbeTrace,
    /// Non-repeatable-read probe trace.
    pub non_repeatable_read: ProbeTrace,
    /// Everything the detector classified.
    pub anomalies: Vec<Anomaly>,
}

/// Runs the probe command.
pub fn run(
    options: &GlobalOptions,
    isolation: &str,
    node: u32,
    row: i64,
    rollback: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let levels = parse_levels(isolation)?;
    let config = options.harness_config()?;
    let node = NodeId::new(node);
    if !config.node_ids().contains(&node) {
        return Err(CliError::UnknownNode(node.as_u32()).into());
    }
    let resource = Resource::trans(row);
    let ending = if rollback {
        WriterEnding::Rollback
    } else {
        WriterEnding::Commit
    };
    let detector = AnomalyDetector::from_config(&config);
    let driver = options.driver(config, &resource)?;

    let mut results = Vec::with_capacity(levels.len());
    for level in levels {
        let dirty_read = driver.dirty_read_probe(&resource, node, level, ending)?;
        let non_repeatable_read = driver.non_repeatable_read_probe(&resource, node, level)?;
        let mut anomalies = detector.dirty_reads(&dirty_read);
        anomalies.extend(detector.non_repeatable_reads(&non_repeatable_read));
        for anomaly in &anomalies {
            driver.sink().log_anomaly(anomaly);
        }
        results.push(ProbeResult {
            isolation: level,
            dirty_read,
            non_repeatable_read,
            anomalies,
        });
    }

    match options.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Text => print_text_output(&resource, node, &results),
    }

    Ok(())
}

fn print_text_output(resource: &Resource, node: NodeId, results: &[ProbeResult]) {
    println!("Isolation probes on {resource}@{node}");
    for result in results {
        println!();
        println!("  {}", result.isolation);

        let writer = &result.dirty_read.writer;
        let seen: Vec<String> = result
            .dirty_read
            .reader
            .reads
            .iter()
            .map(|r| amount(r.amount))
            .collect();
        println!(
            "    dirty read:          writer held {:.2} ({}), reader saw {}",
            writer.in_flight,
            if writer.committed { "committed" } else { "rolled back" },
            seen.join(", ")
        );

        let reads: Vec<String> = result
            .non_repeatable_read
            .reader
            .reads
            .iter()
            .map(|r| amount(r.amount))
            .collect();
        println!("    non-repeatable read: reader saw {}", reads.join(" then "));

        if result.anomalies.is_empty() {
            println!("    no anomalies");
        }
        for anomaly in &result.anomalies {
            let verdict = if anomaly.expected { "permitted" } else { "VIOLATION" };
            println!("    {} [{verdict}]: {}", anomaly.phenomenon, anomaly.description);
        }
    }
}
