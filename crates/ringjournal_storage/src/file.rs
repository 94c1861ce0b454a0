//! File-based storage backend for persistent storage.

use crate::backend::{check_alignment, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::sync_data()` so written bytes reach the disk
/// - `sync()` calls `File::sync_all()` to also persist metadata
///
/// # Direct mode
///
/// A backend opened with [`FileBackend::open_direct`] enforces block
/// alignment on every read and write and syncs data after each write, so a
/// write that returns `Ok` is already on stable storage.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// Internal locking ensures consistent access.
///
/// # Example
///
/// ```no_run
/// use ringjournal_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("journal.bin")).unwrap();
/// backend.set_len(4096).unwrap();
/// backend.write_at(0, b"persistent data").unwrap();
/// backend.flush().unwrap();  // Ensure data is durable
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    block_size: Option<usize>,
}

impl FileBackend {
    /// Opens or creates a buffered file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and writing and its
    /// current length becomes the backend size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_inner(path, None)
    }

    /// Opens or creates a file backend in direct mode.
    ///
    /// # Errors
    ///
    /// Returns an error if `block_size` is zero or not a power of two, or
    /// if the file cannot be opened or created.
    pub fn open_direct(path: &Path, block_size: usize) -> StorageResult<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("block size {block_size} is not a power of two"),
            )));
        }
        Self::open_inner(path, Some(block_size))
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path, block_size: Option<usize>) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match block_size {
            Some(block) => Self::open_direct(path, block),
            None => Self::open(path),
        }
    }

    fn open_inner(path: &Path, block_size: Option<usize>) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            block_size,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_alignment(self.block_size, offset, len)?;

        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        check_alignment(self.block_size, offset, data.len())?;

        let size = *self.size.read();
        let end = offset.saturating_add(data.len() as u64);
        if end > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: data.len(),
                size,
            });
        }

        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if self.block_size.is_some() {
            file.sync_data()?;
        }

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn block_size(&self) -> Option<usize> {
        self.block_size
    }
}
