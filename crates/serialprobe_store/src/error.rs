//! Error types for store operations.

use crate::types::{NodeId, RowId};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification of a native engine error.
///
/// Callers branch on this rather than on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The engine gave up waiting for a row lock.
    LockWaitTimeout,
    /// The engine detected a lock cycle and chose this transaction as victim.
    Deadlock,
    /// The addressed row or node does not exist.
    NotFound,
    /// Anything else.
    Other,
}

/// Errors surfaced by a node store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock wait timeout exceeded; the statement was not applied.
    #[error("lock wait timeout exceeded on {node} for row {row}; try restarting transaction")]
    LockWaitTimeout {
        /// Node that timed out.
        node: NodeId,
        /// Row whose lock was awaited.
        row: RowId,
    },

    /// Deadlock found when trying to get a lock.
    #[error("deadlock found on {node} when trying to get lock on row {row}; try restarting transaction")]
    Deadlock {
        /// Node that detected the cycle.
        node: NodeId,
        /// Row whose lock was requested.
        row: RowId,
    },

    /// The row does not exist.
    #[error("row {row} not found on {node}")]
    RowNotFound {
        /// Node searched.
        node: NodeId,
        /// Missing row.
        row: RowId,
    },

    /// The node is not part of the cluster.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// The transaction was already committed or rolled back.
    #[error("transaction is no longer active on {node}")]
    TransactionClosed {
        /// Node owning the transaction.
        node: NodeId,
    },

    /// The node refused the connection.
    #[error("node {node} unavailable: {message}")]
    Unavailable {
        /// Unavailable node.
        node: NodeId,
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::LockWaitTimeout { .. } => StoreErrorKind::LockWaitTimeout,
            StoreError::Deadlock { .. } => StoreErrorKind::Deadlock,
            StoreError::RowNotFound { .. } | StoreError::UnknownNode(_) => {
                StoreErrorKind::NotFound
            }
            StoreError::TransactionClosed { .. } | StoreError::Unavailable { .. } => {
                StoreErrorKind::Other
            }
        }
    }

    /// Returns true for engine-level lock contention (timeout or deadlock).
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self.kind(),
            StoreErrorKind::LockWaitTimeout | StoreErrorKind::Deadlock
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_errors_classify_together() {
        let timeout = StoreError::LockWaitTimeout {
            node: NodeId::new(1),
            row: RowId::new(60),
        };
        let deadlock = StoreError::Deadlock {
            node: NodeId::new(1),
            row: RowId::new(60),
        };
        assert!(timeout.is_lock_contention());
        assert!(deadlock.is_lock_contention());
        assert_eq!(deadlock.kind(), StoreErrorKind::Deadlock);
    }

    #[test]
    fn missing_row_is_not_found() {
        let err = StoreError::RowNotFound {
            node: NodeId::new(3),
            row: RowId::new(7),
        };
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        assert!(!err.is_lock_contention());
        assert_eq!(err.to_string(), "row 7 not found on node3");
    }
}
