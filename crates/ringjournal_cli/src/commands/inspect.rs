//! Inspect command implementation.

use super::open_existing;
use super::verify::{scan, ScanSummary};
use ringjournal_core::JournalHeader;
use ringjournal_storage::StorageBackend;
use serde::Serialize;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Decoded header.
    pub header: JournalHeader,
    /// Bytes available to entries.
    pub ring_len: u64,
    /// What replay would find.
    pub scan: ScanSummary,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let (backend, header) = open_existing(path)?;
    let scan = scan(&backend, &header)?;
    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: backend.size()?,
        ring_len: header.geometry().ring_len(),
        header,
        scan,
    })
}

fn print_text_output(result: &InspectResult) {
    let header = &result.header;
    println!("Journal: {}", result.path);
    println!("================");
    println!();
    println!("File size:       {} bytes", result.file_size);
    println!("Format version:  {}", header.version);
    println!("Identity:        {}", header.identity);
    println!("Capacity:        {} bytes", header.capacity);
    println!("Block size:      {} bytes", header.block_size);
    println!("Frame alignment: {} bytes", header.frame_alignment);
    println!("Closed cleanly:  {}", header.is_clean());
    println!();
    println!("Ring");
    println!("  Start offset:  {}", header.ring_start);
    println!("  Length:        {} bytes", result.ring_len);
    println!("  Replay from:   {}", header.start);
    println!("  Committed seq: {}", header.committed_seq);
    println!("  Last seq:      {}", header.last_seq);
    if header.is_clean() {
        println!("  Live bytes:    {}", header.live_bytes);
    }
    println!();
    println!("Entries:         {}", result.scan.entries);
    if let (Some(first), Some(last)) = (result.scan.first_seq, result.scan.last_seq) {
        println!("Sequence range:  {first}..={last}");
    }
}
