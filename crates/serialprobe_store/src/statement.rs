//! Typed statements understood by every store backend.

use crate::types::{Row, RowId};
use std::time::Duration;

/// One statement against the `trans` table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statement {
    /// `SELECT trans_id, amount FROM trans WHERE trans_id = ?`, optionally
    /// `FOR UPDATE`.
    Select {
        /// Row to read.
        row: RowId,
        /// Take an exclusive row lock instead of a consistent read.
        for_update: bool,
    },
    /// `UPDATE trans SET amount = ? WHERE trans_id = ?`.
    Update {
        /// Row to update.
        row: RowId,
        /// New amount.
        amount: f64,
    },
    /// `DELETE FROM trans WHERE trans_id = ?`.
    Delete {
        /// Row to delete.
        row: RowId,
    },
    /// `INSERT ... ON DUPLICATE KEY UPDATE amount = ?`.
    Upsert {
        /// Row to write.
        row: RowId,
        /// Amount to store.
        amount: f64,
    },
}

impl Statement {
    /// A plain consistent read.
    #[must_use]
    pub const fn select(row: RowId) -> Self {
        Statement::Select {
            row,
            for_update: false,
        }
    }

    /// A locking read.
    #[must_use]
    pub const fn select_for_update(row: RowId) -> Self {
        Statement::Select {
            row,
            for_update: true,
        }
    }

    /// An update of the amount column.
    #[must_use]
    pub const fn update(row: RowId, amount: f64) -> Self {
        Statement::Update { row, amount }
    }

    /// A delete.
    #[must_use]
    pub const fn delete(row: RowId) -> Self {
        Statement::Delete { row }
    }

    /// An insert-or-update.
    #[must_use]
    pub const fn upsert(row: RowId, amount: f64) -> Self {
        Statement::Upsert { row, amount }
    }

    /// Returns the row this statement addresses.
    #[must_use]
    pub const fn row(&self) -> RowId {
        match *self {
            Statement::Select { row, .. }
            | Statement::Update { row, .. }
            | Statement::Delete { row }
            | Statement::Upsert { row, .. } => row,
        }
    }

    /// Returns true if the statement modifies data.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementOutcome {
    /// Rows returned (empty for writes).
    pub rows: Vec<Row>,
    /// Rows matched by a read or affected by a write.
    pub row_count: u64,
    /// Wall time spent inside the engine, including lock waits.
    pub duration: Duration,
}

impl StatementOutcome {
    /// Returns the amount of the first returned row, if any.
    #[must_use]
    pub fn first_amount(&self) -> Option<f64> {
        self.rows.first().map(|row| row.amount)
    }
}
