//! # RingJournal Testkit
//!
//! Test utilities for ringjournal.
//!
//! This crate provides:
//! - Journal fixtures over temporary files or shared in-memory backends
//! - A crashable backend and a crash recovery harness
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use ringjournal_testkit::prelude::*;
//!
//! with_memory_journal(|journal| {
//!     submit_and_wait(journal, 1, b"small".to_vec()).unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
