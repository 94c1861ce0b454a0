//! # RingJournal Core
//!
//! Durable, append-only ring-buffer journal.
//!
//! This crate provides:
//! - A fixed-capacity journal file with a checksummed header and frames
//! - Asynchronous submission with batched, ordered durability
//! - Completions dispatched in sequence order on a separate thread
//! - Space reclamation driven by the caller's `committed_thru`
//! - Replay after restart that skips entries the caller already applied
//!
//! ## Example
//!
//! ```rust,no_run
//! use ringjournal_core::{Completion, Finisher, GatherBuilder, Journal, JournalConfig, SequenceNumber};
//! use std::sync::Arc;
//!
//! let finisher = Arc::new(Finisher::new("journal"));
//! finisher.start()?;
//! let config = JournalConfig::new("/var/lib/app/journal").capacity_bytes(200 * 1024 * 1024);
//! let journal = Journal::new(config, finisher.clone());
//!
//! journal.open(SequenceNumber::new(41))?;
//! while let Some((payload, seq)) = journal.read_entry()? {
//!     println!("{seq}: {} bytes", payload.len());
//! }
//! journal.make_writeable()?;
//!
//! let (done, waiter) = Completion::channel();
//! let mut gather = GatherBuilder::new(done);
//! for seq in 100..110 {
//!     journal.submit_entry(SequenceNumber::new(seq), vec![0; 64], 0, gather.new_sub())?;
//! }
//! gather.activate();
//! waiter.wait();
//! journal.committed_thru(SequenceNumber::new(109))?;
//! journal.close()?;
//! # Ok::<(), ringjournal_core::JournalError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod config;
mod dispatcher;
mod error;
pub mod journal;
mod types;

pub use completion::{Completion, CompletionWaiter, GatherBuilder};
pub use config::{JournalConfig, BUFFERED_ALIGNMENT, MIN_BLOCK_SIZE};
pub use dispatcher::{CompletionDispatcher, Finisher};
pub use error::{JournalError, JournalResult};
pub use journal::{BackendOpener, Journal, JournalHeader, RingScanner, ScanEnd, ScannedEntry};
pub use types::{JournalState, JournalStats, SequenceNumber};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
