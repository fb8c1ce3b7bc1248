//! Suite command implementation.

use super::{amount, parse_levels, CliError, GlobalOptions, OutputFormat};
use serialprobe_core::{
    AnomalyDetector, OracleReport, Operation, Resource, RunSummary, Scenario,
    SerializabilityOracle,
};

/// Runs the suite command.
pub fn run(
    options: &GlobalOptions,
    scenario: &str,
    isolation: &str,
    row: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario: Scenario = scenario.parse().map_err(CliError::UnknownScenario)?;
    let levels = parse_levels(isolation)?;
    let config = options.harness_config()?;
    let resource = Resource::trans(row);
    let detector = AnomalyDetector::from_config(&config);
    let driver = options.driver(config, &resource)?;
    let workers = scenario.workers();

    let mut reports = Vec::with_capacity(levels.len());
    for level in levels {
        let report = SerializabilityOracle::new(&driver).verify(&resource, &workers, level)?;
        for anomaly in detector.lost_updates(&report.concurrent) {
            driver.sink().log_anomaly(&anomaly);
        }
        reports.push(report);
    }

    match options.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Text => {
            println!("Scenario {scenario} on {resource}, {} workers", workers.len());
            print_comparison(&reports);
            print_validation(&reports);
        }
    }

    Ok(())
}

fn print_comparison(reports: &[OracleReport]) {
    println!();
    println!(
        "  {:<18} {:<11} {:>9} {:>9} {:>9} {:>8}  FAILURES",
        "LEVEL", "MODE", "WALL ms", "THRU /s", "AVG ms", "SUCCESS"
    );
    for report in reports {
        print_summary_row(&report.concurrent_summary);
        print_summary_row(&report.sequential_summary);
    }
}

fn print_summary_row(summary: &RunSummary) {
    let failures = if summary.failures.is_empty() {
        "-".to_string()
    } else {
        summary
            .failures
            .iter()
            .map(|(category, count)| format!("{category}={count}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    println!(
        "  {:<18} {:<11} {:>9} {:>9.2} {:>9} {:>7.1}%  {}",
        summary.isolation.as_sql(),
        summary.mode.to_string(),
        summary.wall_time.as_millis(),
        summary.throughput,
        summary.avg_response.as_millis(),
        summary.success_rate,
        failures
    );
}

fn print_validation(reports: &[OracleReport]) {
    println!();
    println!("Validation (final-state comparison is necessary, not sufficient):");
    for report in reports {
        println!(
            "  {}: {:?}, speedup {:.2}x, concurrent last committer {}, sequential last committer {}",
            report.isolation,
            report.verdict,
            report.speedup,
            report.concurrent_last_committer.as_deref().unwrap_or("-"),
            report.sequential_last_committer.as_deref().unwrap_or("-"),
        );
        if !report.concurrent_summary.ran_concurrently() {
            println!("    note: workers did not overlap in the concurrent run");
        }
        for mismatch in &report.mismatches {
            println!(
                "    {}: concurrent {} vs sequential {}",
                mismatch.node,
                amount(mismatch.concurrent),
                amount(mismatch.sequential)
            );
        }
        if !report.uncompared.is_empty() {
            println!("    not compared, state unreadable: {:?}", report.uncompared);
        }
        for lost in &report.lost_updates {
            println!(
                "    lost update: {}@{} read {:.2} after {}@{} committed {:.2}",
                lost.later,
                lost.later_node,
                lost.later_before,
                lost.earlier,
                lost.earlier_node,
                lost.earlier_after
            );
        }
        for reader in report
            .concurrent
            .outcomes
            .iter()
            .filter(|o| o.is_success() && o.operation == Operation::Read)
        {
            println!(
                "    {}@{} read {} then {}",
                reader.worker,
                reader.node,
                amount(reader.before),
                amount(reader.after)
            );
        }
    }
}
