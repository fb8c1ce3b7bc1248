//! # SerialProbe Store
//!
//! Store adapter contract and an in-memory node engine for SerialProbe.
//!
//! The harness never talks SQL. It sends typed [`Statement`]s to a node
//! through [`NodeStore`] / [`StoreTransaction`] and inspects classified
//! [`StoreError`]s. A [`Cluster`] addresses several independent nodes by id.
//!
//! ## Design Principles
//!
//! - Nodes are independent: no node sees another node's row locks
//! - Native errors are classified by [`StoreErrorKind`], never by message text
//! - Must be `Send + Sync` so concurrent Workers can share a node
//!
//! ## Available Backends
//!
//! - [`MemoryNode`] - multi-version engine emulating the four isolation levels
//!
//! ## Example
//!
//! ```rust
//! use serialprobe_store::{IsolationLevel, MemoryNode, NodeId, NodeStore, RowId, Statement};
//!
//! let node = MemoryNode::new(NodeId::new(1));
//! node.seed(RowId::new(60), 1000.0);
//!
//! let mut txn = node.begin(IsolationLevel::ReadCommitted).unwrap();
//! txn.execute(&Statement::update(RowId::new(60), 1500.0)).unwrap();
//! txn.commit().unwrap();
//! assert_eq!(node.committed_amount(RowId::new(60)), Some(1500.0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cluster;
mod error;
mod memory;
mod statement;
mod types;

pub use backend::{NodeStore, StoreTransaction};
pub use cluster::Cluster;
pub use error::{StoreError, StoreErrorKind, StoreResult};
pub use memory::{MemoryNode, MemoryNodeStats, MemoryTransaction, DEFAULT_LOCK_WAIT_TIMEOUT};
pub use statement::{Statement, StatementOutcome};
pub use types::{IsolationLevel, NodeId, ParseIsolationError, Row, RowId};
