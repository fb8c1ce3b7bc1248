//! Error types for SerialProbe core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur in harness operations.
///
/// Worker-level failures (lock timeouts, engine contention) are not errors:
/// they are recorded in the Worker's outcome. A `ProbeError` means the harness
/// itself could not do its job.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Store adapter error.
    #[error("store error: {0}")]
    Store(#[from] serialprobe_store::StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The lock table backend failed.
    #[error("lock table error: {message}")]
    LockTable {
        /// Description of the failure.
        message: String,
    },

    /// The Worker set cannot be run against the cluster.
    #[error("invalid workload: {message}")]
    InvalidWorkload {
        /// Description of the problem.
        message: String,
    },

    /// A probe participant could not complete.
    #[error("probe failed: {message}")]
    ProbeFailed {
        /// Description of the failure.
        message: String,
    },

    /// A thread panicked.
    #[error("thread panicked: {name}")]
    Panicked {
        /// Name of the thread.
        name: String,
    },
}

impl ProbeError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a lock table error.
    pub fn lock_table(message: impl Into<String>) -> Self {
        Self::LockTable {
            message: message.into(),
        }
    }

    /// Creates an invalid workload error.
    pub fn invalid_workload(message: impl Into<String>) -> Self {
        Self::InvalidWorkload {
            message: message.into(),
        }
    }

    /// Creates a probe failure error.
    pub fn probe_failed(message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
        }
    }

    /// Creates a panic error.
    pub fn panicked(name: impl Into<String>) -> Self {
        Self::Panicked { name: name.into() }
    }
}
