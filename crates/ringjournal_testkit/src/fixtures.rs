//! Test fixtures and journal helpers.
//!
//! Provides convenience functions for setting up test journals
//! and common test scenarios.

use ringjournal_core::{
    BackendOpener, Completion, Finisher, Journal, JournalConfig, JournalResult, SequenceNumber,
};
use ringjournal_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Capacity used by the in-memory fixtures.
pub const MEMORY_CAPACITY: u64 = 1024 * 1024;

/// Identity used by the fixtures.
pub const TEST_IDENTITY: Uuid = Uuid::from_bytes([0x7E; 16]);

/// Builds an opener that hands every open a clone of `backend`.
///
/// Clones of [`InMemoryBackend`] share bytes, so the journal can be closed
/// and reopened over the same data.
pub fn memory_opener<B>(backend: &B) -> BackendOpener
where
    B: StorageBackend + Clone + 'static,
{
    let backend = backend.clone();
    Arc::new(move |_config: &JournalConfig| {
        Ok(Box::new(backend.clone()) as Box<dyn StorageBackend>)
    })
}

/// Starts a finisher for tests.
pub fn test_finisher(name: &str) -> Arc<Finisher> {
    let finisher = Arc::new(Finisher::new(name));
    finisher.start().expect("Failed to start finisher");
    finisher
}

/// A test journal with automatic cleanup.
pub struct TestJournal {
    /// The journal instance.
    pub journal: Journal,
    /// The dispatcher running its completions.
    pub finisher: Arc<Finisher>,
    config: JournalConfig,
    opener: BackendOpener,
    backend: Option<InMemoryBackend>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestJournal {
    /// Creates an uninitialized journal over a fresh in-memory backend.
    pub fn memory() -> Self {
        Self::memory_with(
            JournalConfig::new("memory")
                .capacity_bytes(MEMORY_CAPACITY)
                .identity(TEST_IDENTITY),
        )
    }

    /// Creates an uninitialized journal over a fresh in-memory backend
    /// with the given configuration.
    pub fn memory_with(config: JournalConfig) -> Self {
        let backend = if config.directio {
            InMemoryBackend::with_block_size(config.block_size)
        } else {
            InMemoryBackend::new()
        };
        Self::over(backend, config)
    }

    /// Creates an uninitialized journal over an existing in-memory backend.
    pub fn over(backend: InMemoryBackend, config: JournalConfig) -> Self {
        let finisher = test_finisher("testkit");
        let opener = memory_opener(&backend);
        Self {
            journal: Journal::with_backend_opener(config.clone(), finisher.clone(), opener.clone()),
            finisher,
            config,
            opener,
            backend: Some(backend),
            _temp_dir: None,
        }
    }

    /// Creates an uninitialized journal backed by a file in a temporary
    /// directory.
    pub fn file(capacity: u64, directio: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = JournalConfig::new(temp_dir.path().join("journal"))
            .capacity_bytes(capacity)
            .identity(TEST_IDENTITY)
            .directio(directio);
        let finisher = test_finisher("testkit");
        let journal = Journal::new(config.clone(), finisher.clone());
        let opener: BackendOpener = Arc::new(|config: &JournalConfig| {
            let backend = ringjournal_storage::FileBackend::open_with_create_dirs(
                &config.backing_path,
                config.backend_block_size(),
            )?;
            Ok(Box::new(backend) as Box<dyn StorageBackend>)
        });
        Self {
            journal,
            finisher,
            config,
            opener,
            backend: None,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Creates the journal and makes it writable.
    pub fn writable(self) -> Self {
        self.journal.create().expect("Failed to create journal");
        self.journal
            .make_writeable()
            .expect("Failed to make journal writable");
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns the in-memory backend, if any.
    pub fn backend(&self) -> Option<&InMemoryBackend> {
        self.backend.as_ref()
    }

    /// Returns a second handle over the same storage.
    ///
    /// Only use it while the fixture's own journal is closed.
    pub fn reopen(&self) -> Journal {
        Journal::with_backend_opener(self.config.clone(), self.finisher.clone(), self.opener.clone())
    }

    /// Returns a handle over a copy of the current bytes, as a crash would
    /// leave them. In-memory fixtures only.
    pub fn crash_image(&self) -> Option<Journal> {
        let image = InMemoryBackend::with_data(self.backend.as_ref()?.data());
        Some(Journal::with_backend_opener(
            self.config.clone(),
            self.finisher.clone(),
            memory_opener(&image),
        ))
    }
}

impl std::ops::Deref for TestJournal {
    type Target = Journal;

    fn deref(&self) -> &Self::Target {
        &self.journal
    }
}

/// Submits one entry and blocks until it is durable.
///
/// # Errors
///
/// Returns the submission error, or [`ringjournal_core::JournalError::Failed`]
/// if the journal fails before the entry becomes durable.
pub fn submit_and_wait(journal: &Journal, seq: u64, payload: Vec<u8>) -> JournalResult<()> {
    let (done, waiter) = Completion::channel();
    journal.submit_entry(SequenceNumber::new(seq), payload, 0, done)?;
    while !waiter.wait_timeout(Duration::from_millis(10)) {
        if journal.state() == ringjournal_core::JournalState::Failed {
            return Err(ringjournal_core::JournalError::failed(
                "journal failed before the entry became durable",
            ));
        }
    }
    Ok(())
}

/// Reads every remaining replay entry.
///
/// # Errors
///
/// Returns the first read error.
pub fn replay_all(journal: &Journal) -> JournalResult<Vec<(SequenceNumber, Vec<u8>)>> {
    let mut entries = Vec::new();
    while let Some((payload, seq)) = journal.read_entry()? {
        entries.push((seq, payload));
    }
    Ok(entries)
}

/// Runs a test with a writable in-memory journal, closing it afterwards.
///
/// # Example
///
/// ```rust
/// use ringjournal_testkit::{submit_and_wait, with_memory_journal};
///
/// with_memory_journal(|journal| {
///     submit_and_wait(journal, 1, vec![1, 2, 3]).unwrap();
/// });
/// ```
pub fn with_memory_journal<F, R>(f: F) -> R
where
    F: FnOnce(&Journal) -> R,
{
    let test_journal = TestJournal::memory().writable();
    let result = f(&test_journal.journal);
    test_journal.journal.close().expect("Failed to close journal");
    result
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use crate::generators::pattern_payload;

    /// Creates a closed in-memory journal holding entries `1..=count`.
    pub fn populated_journal(count: u64, entry_size: usize) -> TestJournal {
        let test_journal = TestJournal::memory().writable();
        for seq in 1..=count {
            submit_and_wait(&test_journal, seq, pattern_payload(seq, entry_size))
                .expect("Failed to submit entry");
        }
        test_journal.close().expect("Failed to close journal");
        test_journal
    }
}
