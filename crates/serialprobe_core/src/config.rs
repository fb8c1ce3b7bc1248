//! Harness configuration.
//!
//! Durations are encoded as integer milliseconds in JSON:
//!
//! ```json
//! { "owner": "case3_test", "lease": 60000, "dwell": { "standard": 3000, "strictest": 1500 } }
//! ```
//!
//! Missing fields take their defaults.

use crate::error::{ProbeError, ProbeResult};
use crate::lock::LockOptions;
use crate::types::NodeConfig;
use serde::{Deserialize, Serialize};
use serialprobe_store::{IsolationLevel, NodeId, DEFAULT_LOCK_WAIT_TIMEOUT};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Serde helpers for `Duration` as integer milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserializes milliseconds into a duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// How long Workers sit inside an open transaction after mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    /// Dwell below SERIALIZABLE.
    #[serde(with = "millis")]
    pub standard: Duration,
    /// Dwell at SERIALIZABLE.
    #[serde(with = "millis")]
    pub strictest: Duration,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            standard: Duration::from_secs(3),
            strictest: Duration::from_millis(1500),
        }
    }
}

impl DwellConfig {
    /// Returns the dwell for `isolation`.
    #[must_use]
    pub const fn for_level(&self, isolation: IsolationLevel) -> Duration {
        if isolation.is_strictest() {
            self.strictest
        } else {
            self.standard
        }
    }

    /// Returns the longer of the two dwells.
    #[must_use]
    pub fn longest(&self) -> Duration {
        self.standard.max(self.strictest)
    }
}

/// Timing and values of the isolation probes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// How long the dirty-read writer holds its uncommitted write.
    #[serde(with = "millis")]
    pub writer_hold: Duration,
    /// Delay before the dirty-read reader starts.
    #[serde(with = "millis")]
    pub reader_delay: Duration,
    /// Gap between the non-repeatable-read reader's two reads.
    #[serde(with = "millis")]
    pub reread_gap: Duration,
    /// Delay before the non-repeatable-read modifier starts.
    #[serde(with = "millis")]
    pub modifier_delay: Duration,
    /// Amount the dirty-read writer adds to the baseline.
    pub write_delta: f64,
    /// Amount the modifier adds to the baseline.
    pub modify_delta: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            writer_hold: Duration::from_secs(3),
            reader_delay: Duration::from_secs(1),
            reread_gap: Duration::from_millis(1500),
            modifier_delay: Duration::from_millis(500),
            write_delta: 2000.0,
            modify_delta: 500.0,
        }
    }
}

/// Configuration for a harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Node topology.
    pub nodes: Vec<NodeConfig>,
    /// Holder identity of the harness process.
    pub owner: String,
    /// Lock lease; a lock expires this long after acquisition.
    #[serde(with = "millis")]
    pub lease: Duration,
    /// How long a Worker waits for its DLM lock.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    /// DLM polling interval.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Per-tier dwell.
    pub dwell: DwellConfig,
    /// Longest a node lets a statement wait for a row lock.
    #[serde(with = "millis")]
    pub native_lock_wait: Duration,
    /// Delay between concurrent Worker launches.
    #[serde(with = "millis")]
    pub stagger: Duration,
    /// Amount every node is restored to after a run.
    pub baseline: f64,
    /// Amounts closer than this compare equal.
    pub amount_tolerance: f64,
    /// Timestamp slack the detector allows between threads.
    #[serde(with = "millis")]
    pub jitter: Duration,
    /// Isolation probe settings.
    pub probe: ProbeConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                NodeConfig::coordinator(NodeId::new(1), "node1"),
                NodeConfig::partition(NodeId::new(2), "node2"),
                NodeConfig::partition(NodeId::new(3), "node3"),
            ],
            owner: "case3_test".to_string(),
            lease: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            dwell: DwellConfig::default(),
            native_lock_wait: DEFAULT_LOCK_WAIT_TIMEOUT,
            stagger: Duration::from_millis(100),
            baseline: 1000.0,
            amount_tolerance: 0.01,
            jitter: Duration::from_millis(250),
            probe: ProbeConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails [`HarnessConfig::validate`].
    pub fn from_json_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> ProbeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.nodes.is_empty() {
            return Err(ProbeError::invalid_config("at least one node is required"));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(ProbeError::invalid_config(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
        }
        if self.owner.trim().is_empty() {
            return Err(ProbeError::invalid_config("owner must not be empty"));
        }
        if self.lease <= self.critical_section() {
            return Err(ProbeError::invalid_config(format!(
                "lease {:?} must exceed the longest dwell {:?} plus the native lock wait {:?}",
                self.lease,
                self.dwell.longest(),
                self.native_lock_wait
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ProbeError::invalid_config("poll interval must be non-zero"));
        }
        if !(self.amount_tolerance.is_finite() && self.amount_tolerance > 0.0) {
            return Err(ProbeError::invalid_config(
                "amount tolerance must be positive and finite",
            ));
        }
        if !self.baseline.is_finite() {
            return Err(ProbeError::invalid_config("baseline must be finite"));
        }
        Ok(())
    }

    /// Longest time a Worker can hold its DLM lock: one native row-lock wait
    /// followed by the longest dwell.
    #[must_use]
    pub fn critical_section(&self) -> Duration {
        self.dwell.longest().saturating_add(self.native_lock_wait)
    }

    /// Returns the configured node ids in ascending order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort();
        ids
    }

    /// Returns the dwell for `isolation`.
    #[must_use]
    pub const fn dwell_for(&self, isolation: IsolationLevel) -> Duration {
        self.dwell.for_level(isolation)
    }

    /// Returns the lock options derived from this configuration.
    #[must_use]
    pub fn lock_options(&self) -> LockOptions {
        LockOptions::new()
            .lease(self.lease)
            .poll_interval(self.poll_interval)
    }

    /// Sets the node topology.
    #[must_use]
    pub fn nodes(mut self, nodes: Vec<NodeConfig>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the holder identity.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Sets the lock lease.
    #[must_use]
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Sets the DLM acquisition timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the DLM polling interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets both dwells.
    #[must_use]
    pub fn dwell(mut self, standard: Duration, strictest: Duration) -> Self {
        self.dwell = DwellConfig {
            standard,
            strictest,
        };
        self
    }

    /// Sets the native row-lock wait timeout the nodes are built with.
    #[must_use]
    pub fn native_lock_wait(mut self, wait: Duration) -> Self {
        self.native_lock_wait = wait;
        self
    }

    /// Sets the delay between concurrent launches.
    #[must_use]
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Sets the baseline amount.
    #[must_use]
    pub fn baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }

    /// Sets the amount comparison tolerance.
    #[must_use]
    pub fn amount_tolerance(mut self, tolerance: f64) -> Self {
        self.amount_tolerance = tolerance;
        self
    }

    /// Sets the detector timestamp jitter.
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the probe settings.
    #[must_use]
    pub fn probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }
}
