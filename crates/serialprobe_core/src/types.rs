//! Core type definitions for the harness.

use serde::{Deserialize, Serialize};
use serialprobe_store::{NodeId, RowId};
use std::fmt;

/// A logical record that may be physically present on several nodes.
///
/// The name is the key the DLM locks on; the row is the primary key the
/// Workers address on each node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Resource {
    name: String,
    row: RowId,
}

impl Resource {
    /// Creates a resource with an explicit lock name.
    pub fn new(name: impl Into<String>, row: RowId) -> Self {
        Self {
            name: name.into(),
            row,
        }
    }

    /// Names row `id` of the `trans` table, e.g. `trans_60`.
    #[must_use]
    pub fn trans(id: i64) -> Self {
        Self::new(format!("trans_{id}"), RowId::new(id))
    }

    /// Returns the lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the row key.
    #[must_use]
    pub const fn row(&self) -> RowId {
        self.row
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Role a node plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Holds the reference copy of every record.
    Coordinator,
    /// Holds a subset of records.
    Partition,
}

/// Read-only description of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier.
    pub id: NodeId,
    /// Connection descriptor; opaque to the harness.
    #[serde(default)]
    pub descriptor: String,
    /// Node role.
    pub role: NodeRole,
}

impl NodeConfig {
    /// Creates a coordinator node description.
    pub fn coordinator(id: NodeId, descriptor: impl Into<String>) -> Self {
        Self {
            id,
            descriptor: descriptor.into(),
            role: NodeRole::Coordinator,
        }
    }

    /// Creates a partition node description.
    pub fn partition(id: NodeId, descriptor: impl Into<String>) -> Self {
        Self {
            id,
            descriptor: descriptor.into(),
            role: NodeRole::Partition,
        }
    }
}
