//! The journal header block.

use super::ring::RingGeometry;
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crc32fast::Hasher;
use ringjournal_storage::StorageBackend;
use serde::Serialize;
use uuid::Uuid;

/// Magic bytes identifying a journal header.
pub const HEADER_MAGIC: [u8; 4] = *b"RJHD";

/// Current on-disk format version.
pub const JOURNAL_VERSION: u32 = 1;

/// Encoded header length before padding.
pub const HEADER_LEN: usize = 92;

/// Set by a clean close; `live_bytes` is only meaningful while it is set.
pub const HEADER_FLAG_CLEAN: u32 = 0x0001;

/// Persistent journal metadata stored in the first block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalHeader {
    /// Format version.
    pub version: u32,
    /// Identity token fixed at create.
    pub identity: Uuid,
    /// Total file size in bytes.
    pub capacity: u64,
    /// Header block size.
    pub block_size: u32,
    /// Alignment frames were written with.
    pub frame_alignment: u32,
    /// Header flags.
    pub flags: u32,
    /// First ring byte.
    pub ring_start: u64,
    /// Persisted trim position; replay begins here.
    pub start: u64,
    /// Highest sequence the caller had reported applied.
    pub committed_seq: u64,
    /// Ring bytes that held live entries at clean close.
    pub live_bytes: u64,
    /// Highest sequence ever placed in the ring when the header was written.
    pub last_seq: u64,
}

impl JournalHeader {
    /// Creates the header for a freshly created journal.
    #[must_use]
    pub fn new(config: &JournalConfig) -> Self {
        let ring_start = config.ring_start();
        Self {
            version: JOURNAL_VERSION,
            identity: config.identity,
            capacity: config.capacity_bytes,
            block_size: config.block_size as u32,
            frame_alignment: config.frame_alignment() as u32,
            flags: HEADER_FLAG_CLEAN,
            ring_start,
            start: ring_start,
            committed_seq: 0,
            live_bytes: 0,
            last_seq: 0,
        }
    }

    /// Returns whether the journal was closed cleanly.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.flags & HEADER_FLAG_CLEAN != 0
    }

    /// Ring layout described by this header.
    #[must_use]
    pub fn geometry(&self) -> RingGeometry {
        RingGeometry::new(self.ring_start, self.capacity, self.frame_alignment as usize)
    }

    /// Encodes the header padded to its block size.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.block_size as usize);
        buf.extend_from_slice(&HEADER_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.identity.as_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.frame_alignment.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.ring_start.to_le_bytes());
        buf.extend_from_slice(&self.start.to_le_bytes());
        buf.extend_from_slice(&self.committed_seq.to_le_bytes());
        buf.extend_from_slice(&self.live_bytes.to_le_bytes());
        buf.extend_from_slice(&self.last_seq.to_le_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        buf.resize((self.block_size as usize).max(HEADER_LEN), 0);
        buf
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CorruptHeader`] for a short buffer, bad
    /// magic, checksum mismatch, or unsupported version.
    pub fn decode(bytes: &[u8]) -> JournalResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(JournalError::corrupt_header(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != HEADER_MAGIC {
            return Err(JournalError::corrupt_header("invalid magic"));
        }

        let stored_crc = read_u32(bytes, HEADER_LEN - 4);
        let mut hasher = Hasher::new();
        hasher.update(&bytes[..HEADER_LEN - 4]);
        let computed = hasher.finalize();
        if stored_crc != computed {
            return Err(JournalError::corrupt_header(format!(
                "checksum mismatch: expected {stored_crc:08x}, got {computed:08x}"
            )));
        }

        let version = read_u32(bytes, 4);
        if version != JOURNAL_VERSION {
            return Err(JournalError::corrupt_header(format!(
                "unsupported version {version}"
            )));
        }

        let mut identity = [0u8; 16];
        identity.copy_from_slice(&bytes[8..24]);

        Ok(Self {
            version,
            identity: Uuid::from_bytes(identity),
            capacity: read_u64(bytes, 24),
            block_size: read_u32(bytes, 32),
            frame_alignment: read_u32(bytes, 36),
            flags: read_u32(bytes, 40),
            ring_start: read_u64(bytes, 48),
            start: read_u64(bytes, 56),
            committed_seq: read_u64(bytes, 64),
            live_bytes: read_u64(bytes, 72),
            last_seq: read_u64(bytes, 80),
        })
    }

    /// Reads and decodes the header from the first `read_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails, or
    /// [`JournalError::CorruptHeader`] if the bytes are not a header.
    pub fn read_from(backend: &dyn StorageBackend, read_len: usize) -> JournalResult<Self> {
        let size = backend.size()?;
        if size < read_len as u64 {
            return Err(JournalError::corrupt_header(format!(
                "backing store of {size} bytes is too small for a header"
            )));
        }
        let bytes = backend.read_at(0, read_len)?;
        Self::decode(&bytes)
    }

    /// Writes the header block and syncs it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write or sync fails.
    pub fn write_to(&self, backend: &mut dyn StorageBackend) -> JournalResult<()> {
        backend.write_at(0, &self.encode())?;
        backend.flush()?;
        Ok(())
    }

    /// Checks that this header belongs to the journal `config` describes.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CorruptHeader`] describing the first mismatch.
    pub fn validate_against(&self, config: &JournalConfig) -> JournalResult<()> {
        if self.identity != config.identity {
            return Err(JournalError::corrupt_header(format!(
                "identity {} does not match expected {}",
                self.identity, config.identity
            )));
        }
        if self.capacity != config.capacity_bytes {
            return Err(JournalError::corrupt_header(format!(
                "capacity {} does not match configured {}",
                self.capacity, config.capacity_bytes
            )));
        }
        if self.block_size as usize != config.block_size {
            return Err(JournalError::corrupt_header(format!(
                "block size {} does not match configured {}",
                self.block_size, config.block_size
            )));
        }
        if self.frame_alignment as usize != config.frame_alignment() {
            return Err(JournalError::corrupt_header(format!(
                "journal was written with {} byte frame alignment, configuration expects {}",
                self.frame_alignment,
                config.frame_alignment()
            )));
        }

        let geometry = self.geometry();
        if self.ring_start != config.ring_start() || !geometry.contains(self.start) {
            return Err(JournalError::corrupt_header(format!(
                "start offset {} outside ring [{}, {})",
                self.start, self.ring_start, self.capacity
            )));
        }
        if self.live_bytes > geometry.ring_len() {
            return Err(JournalError::corrupt_header(format!(
                "live bytes {} exceed ring length {}",
                self.live_bytes,
                geometry.ring_len()
            )));
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
