//! # SerialProbe Testkit
//!
//! Test utilities for SerialProbe.
//!
//! This crate provides:
//! - Seeded in-memory clusters and harnesses with scaled-down timings
//! - A fault-injecting lock table
//! - Property-based test generators using proptest
//! - Lock-manager stress helpers
//! - Cross-crate integration helpers (probe matrix, report readers)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use serialprobe_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_harness() {
//!     with_harness(|h| {
//!         let run = h.run(&test_resource(), &workers, level, ExecutionMode::Concurrent);
//!         // ... assertions
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
