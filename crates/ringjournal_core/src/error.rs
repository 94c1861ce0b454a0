//! Error types for the journal.

use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ringjournal_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal hit a write or flush failure and is permanently unusable.
    #[error("journal failed: {message}")]
    Failed {
        /// Description of the original failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid journal configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The header does not belong to this journal or cannot be read.
    #[error("corrupt journal header: {message}")]
    CorruptHeader {
        /// Description of the mismatch.
        message: String,
    },

    /// A ring frame failed validation.
    ///
    /// Replay treats this as the end of the journal; it is only surfaced by
    /// the low-level frame decoder and the maintenance tools.
    #[error("corrupt entry at offset {offset}: {message}")]
    CorruptEntry {
        /// Ring offset of the frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A single entry can never fit in the ring.
    #[error("entry of {frame_len} framed bytes exceeds ring capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Framed size of the rejected entry.
        frame_len: u64,
        /// Usable ring capacity.
        capacity: u64,
    },

    /// A submitted sequence number does not advance the journal.
    #[error("sequence {seq} must be greater than {last}")]
    InvalidSequence {
        /// The rejected sequence number.
        seq: u64,
        /// The highest sequence number already in the journal.
        last: u64,
    },

    /// Operation not permitted in the current lifecycle state.
    #[error("invalid operation: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl JournalError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a corrupt header error.
    pub fn corrupt_header(message: impl Into<String>) -> Self {
        Self::CorruptHeader {
            message: message.into(),
        }
    }

    /// Creates a corrupt entry error.
    pub fn corrupt_entry(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptEntry {
            offset,
            message: message.into(),
        }
    }

    /// Creates a failed-instance error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the storage layer.
    ///
    /// These are fatal to a writable journal instance.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_) | Self::Failed { .. })
    }
}
