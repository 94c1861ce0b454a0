//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A low-level positional storage backend for the journal.
///
/// Storage backends are **opaque byte stores** of a fixed, preallocated
/// size. The journal owns all format interpretation - backends do not
/// understand headers, frames, or wrap markers.
///
/// # Invariants
///
/// - `write_at` never grows the store; the journal sizes it with `set_len`
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` ensures all written data is durable
/// - When `block_size` is `Some(n)`, every `read_at`/`write_at` offset and
///   length must be a multiple of `n`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - The request violates the alignment contract
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` starting at `offset`, overwriting what was there.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The write would extend beyond the current size
    /// - The request violates the alignment contract
    /// - An I/O error occurs
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all written data to durable storage.
    ///
    /// After this returns successfully, all previously written data
    /// is guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Resizes the storage to exactly `new_size` bytes.
    ///
    /// Growing fills the new region with zeros; shrinking discards
    /// everything past `new_size`. The journal calls this once, at create.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize fails.
    fn set_len(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns the alignment block size when the backend runs in direct
    /// mode, `None` for buffered backends.
    fn block_size(&self) -> Option<usize> {
        None
    }
}

/// Checks an I/O request against an optional block-size contract.
///
/// # Errors
///
/// Returns [`StorageError::Misaligned`] when `block_size` is set and either
/// `offset` or `len` is not a multiple of it.
pub fn check_alignment(block_size: Option<usize>, offset: u64, len: usize) -> StorageResult<()> {
    match block_size {
        Some(block) if block > 0 => {
            if offset % block as u64 != 0 || len % block != 0 {
                return Err(StorageError::Misaligned {
                    offset,
                    len,
                    block_size: block,
                });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
