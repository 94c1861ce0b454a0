//! # ringjournal storage
//!
//! Storage backend trait and implementations for ringjournal.
//!
//! This crate provides the lowest-level storage abstraction for the
//! journal. Storage backends are **opaque, fixed-size byte stores** - they
//! do not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are positional byte stores (read at, write at, flush)
//! - No knowledge of the journal header, frames, or ring layout
//! - Must be `Send + Sync` so the journal writer thread can own them
//! - An optional block size turns on the direct-I/O alignment contract
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral journals
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use ringjournal_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.set_len(64).unwrap();
//! backend.write_at(8, b"hello world").unwrap();
//! let data = backend.read_at(8, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{check_alignment, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
