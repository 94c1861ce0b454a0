//! Journal configuration.

use crate::error::{JournalError, JournalResult};
use crate::journal::FRAME_HEADER_LEN;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Smallest accepted alignment block.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Frame alignment used when direct I/O is off.
pub const BUFFERED_ALIGNMENT: usize = 8;

/// Configuration for creating or opening a journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Total size of the backing region in bytes, header included.
    pub capacity_bytes: u64,

    /// Identity token; must match between create and open.
    pub identity: Uuid,

    /// Location of the journal file.
    pub backing_path: PathBuf,

    /// Whether to use the block-aligned, write-through I/O path.
    pub directio: bool,

    /// Alignment block size. The header always occupies one block; frames
    /// are padded to it only when `directio` is set.
    pub block_size: usize,

    /// Upper bound on bytes coalesced into one physical write.
    pub max_batch_bytes: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 100 * 1024 * 1024, // 100 MB
            identity: Uuid::nil(),
            backing_path: PathBuf::from("journal"),
            directio: false,
            block_size: 4096,
            max_batch_bytes: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl JournalConfig {
    /// Creates a configuration with default values for the given path.
    #[must_use]
    pub fn new(backing_path: impl AsRef<Path>) -> Self {
        Self {
            backing_path: backing_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets the total capacity in bytes.
    #[must_use]
    pub const fn capacity_bytes(mut self, value: u64) -> Self {
        self.capacity_bytes = value;
        self
    }

    /// Sets the identity token.
    #[must_use]
    pub const fn identity(mut self, value: Uuid) -> Self {
        self.identity = value;
        self
    }

    /// Sets whether direct I/O is used.
    #[must_use]
    pub const fn directio(mut self, value: bool) -> Self {
        self.directio = value;
        self
    }

    /// Sets the alignment block size.
    #[must_use]
    pub const fn block_size(mut self, value: usize) -> Self {
        self.block_size = value;
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn max_batch_bytes(mut self, value: usize) -> Self {
        self.max_batch_bytes = value;
        self
    }

    /// Offset of the first ring byte.
    #[must_use]
    pub const fn ring_start(&self) -> u64 {
        self.block_size as u64
    }

    /// Alignment every frame is padded to.
    #[must_use]
    pub const fn frame_alignment(&self) -> usize {
        if self.directio {
            self.block_size
        } else {
            BUFFERED_ALIGNMENT
        }
    }

    /// Block size to enforce on the backend, if any.
    #[must_use]
    pub const fn backend_block_size(&self) -> Option<usize> {
        if self.directio {
            Some(self.block_size)
        } else {
            None
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Config`] when the block size is not a power
    /// of two of at least [`MIN_BLOCK_SIZE`], when the capacity is zero or
    /// leaves no room for a frame after the header, or, under direct I/O,
    /// when the capacity is not a whole number of blocks.
    pub fn validate(&self) -> JournalResult<()> {
        if self.capacity_bytes == 0 {
            return Err(JournalError::config("capacity must be greater than zero"));
        }
        if self.block_size < MIN_BLOCK_SIZE || !self.block_size.is_power_of_two() {
            return Err(JournalError::config(format!(
                "block size {} must be a power of two of at least {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if self.directio && self.capacity_bytes % self.block_size as u64 != 0 {
            return Err(JournalError::config(format!(
                "capacity {} is not a multiple of the {} byte block size",
                self.capacity_bytes, self.block_size
            )));
        }
        let smallest_frame = FRAME_HEADER_LEN.max(self.frame_alignment()) as u64;
        if self.capacity_bytes < self.ring_start() + smallest_frame {
            return Err(JournalError::config(format!(
                "capacity {} leaves no ring space after the {} byte header",
                self.capacity_bytes,
                self.ring_start()
            )));
        }
        if self.max_batch_bytes == 0 {
            return Err(JournalError::config("max batch size must be greater than zero"));
        }
        if self.backing_path.as_os_str().is_empty() {
            return Err(JournalError::config("backing path is empty"));
        }
        Ok(())
    }
}
