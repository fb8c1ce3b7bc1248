//! SerialProbe CLI
//!
//! Command-line runner for the concurrency harness.
//!
//! # Commands
//!
//! - `suite` - Concurrent vs sequential runs of a scenario and oracle verdicts per level
//! - `probe` - Dirty-read and non-repeatable-read probes
//! - `locks` - Two callers racing multi-node acquisition in opposite orders

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SerialProbe concurrency harness.
#[derive(Parser)]
#[command(name = "serialprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Harness configuration file (JSON)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    /// Append step, anomaly and run records to this JSON-lines file
    #[arg(global = true, short, long)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario concurrently and sequentially
    Suite {
        /// Scenario (update-only, mixed, concurrent-reads, read-write)
        #[arg(short, long, default_value = "update-only")]
        scenario: String,

        /// Isolation level, or "all"
        #[arg(short, long, default_value = "all")]
        isolation: String,

        /// Row id of the resource
        #[arg(long, default_value = "60")]
        row: i64,
    },

    /// Probe for dirty and non-repeatable reads
    Probe {
        /// Isolation level, or "all"
        #[arg(short, long, default_value = "all")]
        isolation: String,

        /// Node to probe
        #[arg(short, long, default_value = "1")]
        node: u32,

        /// Row id of the resource
        #[arg(long, default_value = "60")]
        row: i64,

        /// Roll the dirty-read writer back instead of committing
        #[arg(long)]
        rollback: bool,
    },

    /// Race two callers acquiring nodes [1,2] and [2,1]
    Locks {
        /// How long the winner holds its locks
        #[arg(long, default_value = "2000")]
        hold_ms: u64,

        /// Acquisition timeout for both callers
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Share locks through this file instead of process memory
        #[arg(long)]
        table: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let format: commands::OutputFormat = cli.format.parse()?;
    let options = commands::GlobalOptions {
        config: cli.config,
        format,
        report: cli.report,
    };

    match cli.command {
        Commands::Suite {
            scenario,
            isolation,
            row,
        } => {
            commands::suite::run(&options, &scenario, &isolation, row)?;
        }
        Commands::Probe {
            isolation,
            node,
            row,
            rollback,
        } => {
            commands::probe::run(&options, &isolation, node, row, rollback)?;
        }
        Commands::Locks {
            hold_ms,
            timeout_ms,
            table,
        } => {
            commands::locks::run(&options, hold_ms, timeout_ms, table.as_deref())?;
        }
        Commands::Version => {
            println!("SerialProbe CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SerialProbe Core v{}", serialprobe_core::VERSION);
        }
    }

    Ok(())
}
