//! A set of independently-administered nodes addressed by id.

use crate::backend::{NodeStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};
use crate::statement::{Statement, StatementOutcome};
use crate::types::{IsolationLevel, NodeId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The node topology the harness talks to.
///
/// Nodes are kept in ascending id order; there is no shared state between
/// them.
#[derive(Clone, Default)]
pub struct Cluster {
    nodes: BTreeMap<NodeId, Arc<dyn NodeStore>>,
}

impl Cluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, replacing any node with the same id.
    #[must_use]
    pub fn with_node(mut self, node: Arc<dyn NodeStore>) -> Self {
        self.insert(node);
        self
    }

    /// Adds a node, replacing any node with the same id.
    pub fn insert(&mut self, node: Arc<dyn NodeStore>) {
        self.nodes.insert(node.node_id(), node);
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownNode`] if the id is not configured.
    pub fn node(&self, id: NodeId) -> StoreResult<&Arc<dyn NodeStore>> {
        self.nodes.get(&id).ok_or(StoreError::UnknownNode(id))
    }

    /// Returns all node ids in ascending order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Begins a transaction on `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unknown or refuses the transaction.
    pub fn begin(
        &self,
        node: NodeId,
        isolation: IsolationLevel,
    ) -> StoreResult<Box<dyn StoreTransaction>> {
        self.node(node)?.begin(isolation)
    }

    /// Executes an autocommit statement on `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unknown or the statement fails.
    pub fn execute(
        &self,
        node: NodeId,
        statement: &Statement,
        isolation: IsolationLevel,
    ) -> StoreResult<StatementOutcome> {
        self.node(node)?.execute(statement, isolation)
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.node_ids())
            .finish()
    }
}
