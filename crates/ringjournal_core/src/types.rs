//! Core type definitions for the journal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number of a journal entry.
///
/// Sequence numbers are assigned by the caller and strictly increase
/// within a journal. Zero means "nothing yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The sequence number preceding every real entry.
    pub const ZERO: Self = Self(0);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for SequenceNumber {
    fn from(seq: u64) -> Self {
        Self(seq)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Lifecycle state of a journal instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalState {
    /// No backing resource attached.
    Uninitialized,
    /// Freshly created; waiting for `make_writeable`.
    Created,
    /// Opened; `read_entry` is valid.
    Replaying,
    /// Accepting submissions.
    Writable,
    /// Closed cleanly; may be opened or created again.
    Closed,
    /// A write failed; every further operation fails.
    Failed,
}

impl fmt::Display for JournalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Created => "created",
            Self::Replaying => "replaying",
            Self::Writable => "writable",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of journal counters and cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalStats {
    /// Current lifecycle state.
    pub state: JournalState,
    /// Next byte the writer will use.
    pub write_offset: u64,
    /// Earliest byte still needed.
    pub trim_offset: u64,
    /// Ring bytes currently holding live entries (wrap gaps included).
    pub used_bytes: u64,
    /// Total usable ring bytes.
    pub ring_capacity: u64,
    /// Highest sequence confirmed on stable storage.
    pub durable_seq: u64,
    /// Highest sequence the caller confirmed as applied.
    pub committed_seq: u64,
    /// Entries submitted but not yet durable.
    pub pending_entries: usize,
    /// Physical batches written since the journal became writable.
    pub batches_written: u64,
    /// Frame bytes written since the journal became writable.
    pub bytes_written: u64,
    /// Times the writer had to wait for `committed_thru` to free space.
    pub stalls: u64,
}
