//! Create command implementation.

use ringjournal_core::{Finisher, Journal, JournalConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Runs the create command.
pub fn run(
    path: &Path,
    capacity: u64,
    identity: Option<&str>,
    directio: bool,
    block_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!("{} already exists", path.display()).into());
    }
    let identity = match identity {
        Some(text) => Uuid::parse_str(text)?,
        None => Uuid::new_v4(),
    };
    let config = JournalConfig::new(path)
        .capacity_bytes(capacity)
        .identity(identity)
        .directio(directio)
        .block_size(block_size);
    config.validate()?;

    let finisher = Arc::new(Finisher::new("ringjournal-cli"));
    let journal = Journal::new(config, finisher);
    journal.create()?;
    journal.close()?;
    info!(path = %path.display(), %identity, capacity, directio, "journal file created");

    println!("Created journal at {}", path.display());
    println!("  Identity:  {identity}");
    println!("  Capacity:  {capacity} bytes");
    println!("  Direct IO: {directio}");
    Ok(())
}
