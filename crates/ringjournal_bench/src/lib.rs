//! Benchmark utilities.

use rand::Rng;
use ringjournal_core::{Completion, Finisher, Journal, JournalConfig, SequenceNumber};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Capacity of benchmark journals.
pub const CAPACITY: u64 = 64 * 1024 * 1024;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate patterned data of the specified size.
pub fn pattern_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// A writable journal in a temporary directory.
pub struct BenchJournal {
    /// The journal.
    pub journal: Journal,
    next_seq: u64,
    _finisher: Arc<Finisher>,
    _dir: TempDir,
}

impl BenchJournal {
    /// Creates a journal of [`CAPACITY`] bytes and makes it writable.
    pub fn new(directio: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig::new(dir.path().join("journal"))
            .capacity_bytes(CAPACITY)
            .identity(Uuid::new_v4())
            .directio(directio);
        let finisher = Arc::new(Finisher::new("bench"));
        finisher.start().unwrap();
        let journal = Journal::new(config, finisher.clone());
        journal.create().unwrap();
        journal.make_writeable().unwrap();
        Self {
            journal,
            next_seq: 1,
            _finisher: finisher,
            _dir: dir,
        }
    }

    /// Submits `payload` under the next sequence number and returns it.
    pub fn submit(&mut self, payload: Vec<u8>, completion: Completion) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.journal
            .submit_entry(SequenceNumber::new(seq), payload, 0, completion)
            .unwrap();
        seq
    }
}
