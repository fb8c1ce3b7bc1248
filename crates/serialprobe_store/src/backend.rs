//! Store adapter trait definitions.

use crate::error::StoreResult;
use crate::statement::{Statement, StatementOutcome};
use crate::types::{IsolationLevel, NodeId};

/// One database node as seen by the harness.
///
/// A node executes typed statements under a requested isolation level and
/// surfaces its native errors as [`crate::StoreError`]. It knows nothing about
/// distributed locks; cross-node coordination lives above this trait.
///
/// # Invariants
///
/// - `begin` returns a transaction whose reads follow the requested level
/// - Row locks taken by a transaction are held until commit or rollback
/// - Implementations must be `Send + Sync` so Workers can share a node
///
/// # Implementors
///
/// - [`super::MemoryNode`] - multi-version in-memory engine
pub trait NodeStore: Send + Sync {
    /// Returns the node's identifier.
    fn node_id(&self) -> NodeId;

    /// Begins a native transaction at `isolation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot open a transaction.
    fn begin(&self, isolation: IsolationLevel) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Executes one statement in its own autocommit transaction.
    ///
    /// # Errors
    ///
    /// Returns the native error of the statement or its commit.
    fn execute(
        &self,
        statement: &Statement,
        isolation: IsolationLevel,
    ) -> StoreResult<StatementOutcome> {
        let mut txn = self.begin(isolation)?;
        match txn.execute(statement) {
            Ok(outcome) => {
                txn.commit()?;
                Ok(outcome)
            }
            Err(err) => {
                // The statement error is what the caller needs to see.
                let _ = txn.rollback();
                Err(err)
            }
        }
    }
}

/// An open native transaction on one node.
///
/// Dropping an unfinished transaction rolls it back.
pub trait StoreTransaction: Send {
    /// Returns the node this transaction runs on.
    fn node_id(&self) -> NodeId;

    /// Returns the isolation level the transaction was opened with.
    fn isolation(&self) -> IsolationLevel;

    /// Executes one statement inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns lock-wait timeouts, deadlocks, or
    /// [`crate::StoreError::TransactionClosed`].
    fn execute(&mut self, statement: &Statement) -> StoreResult<StatementOutcome>;

    /// Commits, publishing writes and releasing row locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active.
    fn commit(&mut self) -> StoreResult<()>;

    /// Rolls back, discarding writes and releasing row locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active.
    fn rollback(&mut self) -> StoreResult<()>;
}
