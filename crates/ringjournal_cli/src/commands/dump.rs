//! Dump command implementation.

use super::open_existing;
use ringjournal_core::{JournalHeader, RingScanner};
use ringjournal_storage::StorageBackend;
use serde::Serialize;
use std::path::Path;

/// Entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Ring offset of the frame.
    pub offset: u64,
    /// Sequence number.
    pub seq: u64,
    /// Caller flags.
    pub flags: u32,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Bytes the frame occupies in the ring.
    pub frame_len: u64,
    /// First bytes of the payload, hex-encoded.
    pub preview: String,
}

const PREVIEW_BYTES: usize = 16;

/// Runs the dump command.
pub fn run(
    path: &Path,
    after: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (backend, header) = open_existing(path)?;
    let entries = read_entries(&backend, &header, after, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn read_entries(
    backend: &dyn StorageBackend,
    header: &JournalHeader,
    after: u64,
    limit: Option<usize>,
) -> Result<Vec<EntryInfo>, Box<dyn std::error::Error>> {
    let mut scanner = RingScanner::new(header);
    let mut entries = Vec::new();
    let max_entries = limit.unwrap_or(usize::MAX);

    while entries.len() < max_entries {
        let Some(entry) = scanner.next_entry(backend)? else {
            break;
        };
        if entry.seq <= after {
            continue;
        }
        let preview = &entry.payload[..entry.payload.len().min(PREVIEW_BYTES)];
        entries.push(EntryInfo {
            offset: entry.offset,
            seq: entry.seq,
            flags: entry.flags,
            payload_size: entry.payload.len(),
            frame_len: entry.frame_len,
            preview: hex_encode(preview),
        });
    }

    Ok(entries)
}

fn print_text_output(entries: &[EntryInfo]) {
    println!("Journal Entries ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!("[{:012}] seq={:<10}", entry.offset, entry.seq);
        if entry.flags != 0 {
            print!(" flags={:#010x}", entry.flags);
        }
        print!(" size={}", entry.payload_size);
        if !entry.preview.is_empty() {
            print!(" data={}", entry.preview);
            if entry.payload_size > PREVIEW_BYTES {
                print!("...");
            }
        }
        println!();
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_journal;
    use tempfile::TempDir;

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0xff]), "00abff");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn test_read_entries_after_and_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal");
        write_journal(&path, 6, 0);

        let (backend, header) = open_existing(&path).unwrap();
        let all = read_entries(&backend, &header, 0, None).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].payload_size, 40);
        assert_eq!(all[0].preview, "01".repeat(PREVIEW_BYTES));

        let some = read_entries(&backend, &header, 2, Some(3)).unwrap();
        let seqs: Vec<u64> = some.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }
}
