//! CLI command implementations.

pub mod create;
pub mod dump;
pub mod inspect;
pub mod verify;

use ringjournal_core::{JournalHeader, MIN_BLOCK_SIZE};
use ringjournal_storage::FileBackend;
use std::path::Path;
use tracing::debug;

/// Opens an existing journal file for reading and decodes its header.
///
/// The file is opened buffered whatever mode it was written in; reads
/// through the scanner need no alignment.
pub fn open_existing(path: &Path) -> Result<(FileBackend, JournalHeader), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No journal found at {}", path.display()).into());
    }
    let backend = FileBackend::open(path)?;
    let header = JournalHeader::read_from(&backend, MIN_BLOCK_SIZE)?;
    debug!(
        path = %path.display(),
        identity = %header.identity,
        clean = header.is_clean(),
        "journal header read"
    );
    Ok((backend, header))
}
