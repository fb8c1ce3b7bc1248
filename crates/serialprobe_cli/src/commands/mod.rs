//! CLI command implementations.

pub mod locks;
pub mod probe;
pub mod suite;

use serialprobe_core::{
    Driver, HarnessConfig, JsonLinesSink, ReportSink, Resource, TracingSink,
};
use serialprobe_store::{Cluster, IsolationLevel, MemoryNode, NodeStore, RowId};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors in command-line arguments.
#[derive(Debug, Error)]
pub enum CliError {
    /// Unrecognized `--format`.
    #[error("unknown output format: {0} (expected text or json)")]
    UnknownFormat(String),

    /// Unrecognized `--isolation`.
    #[error("unknown isolation level: {0}")]
    UnknownIsolation(String),

    /// Unrecognized `--scenario`.
    #[error("{0}")]
    UnknownScenario(String),

    /// A node id outside the configured topology.
    #[error("node {0} is not configured")]
    UnknownNode(u32),
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Options shared by every command.
pub struct GlobalOptions {
    /// Configuration file, if any.
    pub config: Option<PathBuf>,
    /// Output format.
    pub format: OutputFormat,
    /// JSON-lines report path, if any.
    pub report: Option<PathBuf>,
}

impl GlobalOptions {
    /// Loads and validates the harness configuration.
    pub fn harness_config(&self) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
        let config = match &self.config {
            Some(path) => HarnessConfig::from_json_file(path)?,
            None => HarnessConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Opens the report sink: a JSON-lines file if `--report` was given,
    /// otherwise the log stream.
    pub fn sink(&self) -> Result<Arc<dyn ReportSink>, Box<dyn std::error::Error>> {
        Ok(match &self.report {
            Some(path) => Arc::new(JsonLinesSink::create(path)?),
            None => Arc::new(TracingSink),
        })
    }

    /// Builds a driver over in-memory nodes seeded with `resource` at the
    /// configured baseline.
    pub fn driver(
        &self,
        config: HarnessConfig,
        resource: &Resource,
    ) -> Result<Driver, Box<dyn std::error::Error>> {
        let cluster = seeded_cluster(&config, resource.row());
        Ok(Driver::in_memory(cluster, config).with_sink(self.sink()?))
    }
}

/// Creates one in-memory node per configured node, each holding `row`.
pub fn seeded_cluster(config: &HarnessConfig, row: RowId) -> Cluster {
    config.node_ids().into_iter().fold(Cluster::new(), |cluster, id| {
        let node = MemoryNode::with_lock_wait_timeout(id, config.native_lock_wait);
        node.seed(row, config.baseline);
        cluster.with_node(Arc::new(node) as Arc<dyn NodeStore>)
    })
}

/// Parses an isolation level argument; `all` selects every level.
pub fn parse_levels(arg: &str) -> Result<Vec<IsolationLevel>, CliError> {
    if arg.eq_ignore_ascii_case("all") {
        return Ok(IsolationLevel::ALL.to_vec());
    }
    arg.parse::<IsolationLevel>()
        .map(|level| vec![level])
        .map_err(|_| CliError::UnknownIsolation(arg.to_string()))
}

/// Formats an optional amount for tables.
pub fn amount(value: Option<f64>) -> String {
    value.map_or_else(|| "deleted".to_string(), |v| format!("{v:.2}"))
}
