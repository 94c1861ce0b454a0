//! Crash recovery testing for ringjournal.
//!
//! This module simulates crashes at various points while entries are being
//! written and verifies that replay recovers exactly what it should.
//!
//! ## Test Strategy
//!
//! 1. **Torn write** - the backend stops partway through a write
//! 2. **Failed flush** - data reached the backend but durability failed
//! 3. **After durable** - the process dies with everything acknowledged
//!
//! In every case, replay must yield a contiguous run of entries starting at
//! the first one, with every acknowledged entry included and intact.
//!
//! ## Usage
//!
//! ```rust
//! use ringjournal_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::memory(256 * 1024);
//! let result = harness.run(CrashPoint::TornWrite { after_bytes: 10_000 }, 50, 300);
//! assert!(result.passed, "{result:?}");
//! ```

use crate::fixtures::{memory_opener, test_finisher, TEST_IDENTITY};
use crate::generators::pattern_payload;
use ringjournal_core::{
    Completion, Finisher, Journal, JournalConfig, JournalState, SequenceNumber,
};
use ringjournal_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrashPoint {
    /// The backend accepts `after_bytes` more bytes, then tears the write
    /// that crosses the limit and fails.
    TornWrite {
        /// Bytes written before the tear.
        after_bytes: usize,
    },
    /// Flushes start failing after half of the entries are acknowledged.
    FailedFlush,
    /// Every entry is acknowledged before the crash.
    AfterDurable,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone, Serialize)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Entries acknowledged before the crash.
    pub acknowledged: u64,
    /// Entries returned by replay.
    pub recovered: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, acknowledged: u64, recovered: u64) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            acknowledged,
            recovered,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, acknowledged: u64, recovered: u64, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            acknowledged,
            recovered,
            error: Some(error.to_string()),
        }
    }

    /// Serializes the result as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

/// An in-memory backend that can simulate crashes.
///
/// Clones share both the bytes and the crash controls.
#[derive(Debug, Clone)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

impl Default for CrashableBackend {
    fn default() -> Self {
        Self::new(InMemoryBackend::new())
    }
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an in-memory backend.
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_on_flush: AtomicBool::new(false),
            }),
        }
    }

    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: usize) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.state.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Copies the bytes as they stand into a plain backend.
    pub fn image(&self) -> InMemoryBackend {
        InMemoryBackend::with_data(self.inner.data())
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("write"));
        }
        let current = self.state.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.crash("write"));
        }
        if current + data.len() > threshold {
            let partial_len = threshold - current;
            let _ = self.inner.write_at(offset, &data[..partial_len]);
            return Err(self.crash("partial write"));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.set_len(new_size)
    }

    fn block_size(&self) -> Option<usize> {
        self.inner.block_size()
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    config: JournalConfig,
    finisher: Arc<Finisher>,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness for in-memory journals of `capacity` bytes.
    pub fn memory(capacity: u64) -> Self {
        Self::with_config(
            JournalConfig::new("memory")
                .capacity_bytes(capacity)
                .identity(TEST_IDENTITY),
        )
    }

    /// Creates a harness for the given configuration.
    pub fn with_config(config: JournalConfig) -> Self {
        Self {
            config,
            finisher: test_finisher("crash"),
            results: Vec::new(),
        }
    }

    /// Writes up to `entries` entries of `entry_size` bytes, crashes at
    /// `point`, replays the surviving bytes, and checks what came back.
    pub fn run(&mut self, point: CrashPoint, entries: u64, entry_size: usize) -> CrashRecoveryResult {
        let description = format!("{point:?} with {entries} entries of {entry_size} bytes");
        let result = self.run_inner(point, entries, entry_size, &description);
        self.results.push(result.clone());
        result
    }

    /// Returns whether every recorded run passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    fn run_inner(
        &self,
        point: CrashPoint,
        entries: u64,
        entry_size: usize,
        description: &str,
    ) -> CrashRecoveryResult {
        let inner = match self.config.backend_block_size() {
            Some(block_size) => InMemoryBackend::with_block_size(block_size),
            None => InMemoryBackend::new(),
        };
        let backend = CrashableBackend::new(inner);
        let journal = Journal::with_backend_opener(
            self.config.clone(),
            self.finisher.clone(),
            memory_opener(&backend),
        );
        if let Err(err) = journal.create().and_then(|()| journal.make_writeable()) {
            return CrashRecoveryResult::fail(description, 0, 0, &err.to_string());
        }

        if let CrashPoint::TornWrite { after_bytes } = point {
            backend.crash_after(after_bytes);
        }

        let mut acknowledged = 0u64;
        for seq in 1..=entries {
            if point == CrashPoint::FailedFlush && seq == entries / 2 + 1 {
                backend.set_fail_on_flush(true);
            }
            let (done, waiter) = Completion::channel();
            let payload = pattern_payload(seq, entry_size);
            if journal
                .submit_entry(SequenceNumber::new(seq), payload, 0, done)
                .is_err()
            {
                break;
            }
            if !wait_or_failed(&journal, &waiter) {
                break;
            }
            acknowledged = seq;
        }

        let image = if backend.has_crashed() || point == CrashPoint::AfterDurable {
            backend.image()
        } else {
            return CrashRecoveryResult::fail(
                description,
                acknowledged,
                0,
                "crash point was never reached",
            );
        };
        drop(journal);

        self.verify(description, &image, acknowledged, entries, entry_size)
    }

    fn verify(
        &self,
        description: &str,
        image: &InMemoryBackend,
        acknowledged: u64,
        submitted: u64,
        entry_size: usize,
    ) -> CrashRecoveryResult {
        let journal = Journal::with_backend_opener(
            self.config.clone(),
            self.finisher.clone(),
            memory_opener(image),
        );
        if let Err(err) = journal.open(SequenceNumber::ZERO) {
            return CrashRecoveryResult::fail(description, acknowledged, 0, &err.to_string());
        }

        let mut recovered = 0u64;
        loop {
            match journal.read_entry() {
                Ok(Some((payload, seq))) => {
                    let expected = recovered + 1;
                    if seq.as_u64() != expected {
                        return CrashRecoveryResult::fail(
                            description,
                            acknowledged,
                            recovered,
                            &format!("expected {}, replay returned {seq}", SequenceNumber::new(expected)),
                        );
                    }
                    if payload != pattern_payload(expected, entry_size) {
                        return CrashRecoveryResult::fail(
                            description,
                            acknowledged,
                            recovered,
                            &format!("payload of {seq} does not match"),
                        );
                    }
                    recovered = expected;
                }
                Ok(None) => break,
                Err(err) => {
                    return CrashRecoveryResult::fail(
                        description,
                        acknowledged,
                        recovered,
                        &err.to_string(),
                    );
                }
            }
        }
        let _ = journal.close();

        if recovered < acknowledged {
            return CrashRecoveryResult::fail(
                description,
                acknowledged,
                recovered,
                "acknowledged entries were lost",
            );
        }
        if recovered > submitted {
            return CrashRecoveryResult::fail(
                description,
                acknowledged,
                recovered,
                "replay returned entries that were never submitted",
            );
        }
        CrashRecoveryResult::pass(description, acknowledged, recovered)
    }
}

fn wait_or_failed(journal: &Journal, waiter: &ringjournal_core::CompletionWaiter) -> bool {
    loop {
        if waiter.wait_timeout(Duration::from_millis(10)) {
            return true;
        }
        if journal.state() == JournalState::Failed {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crashable_backend_tears_write() {
        let mut backend = CrashableBackend::default();
        backend.set_len(64).unwrap();
        backend.crash_after(10);

        assert!(backend.write_at(0, &[1u8; 8]).is_ok());
        assert!(backend.write_at(8, &[2u8; 8]).is_err());
        assert!(backend.has_crashed());

        let image = backend.image();
        assert_eq!(&image.data()[..12], &[1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 0, 0]);
        assert!(backend.write_at(32, &[3u8; 1]).is_err());

        backend.reset();
        assert!(backend.write_at(32, &[3u8; 1]).is_ok());
    }

    #[test]
    fn test_torn_write_recovery() {
        let mut harness = CrashRecoveryHarness::memory(256 * 1024);
        for after_bytes in [4096 + 1, 4096 + 500, 20_000, 50_000] {
            let result = harness.run(CrashPoint::TornWrite { after_bytes }, 200, 300);
            assert!(result.passed, "{}", result.to_json());
        }
        assert!(harness.all_passed());
    }

    #[test]
    fn test_failed_flush_recovery() {
        let mut harness = CrashRecoveryHarness::memory(256 * 1024);
        let result = harness.run(CrashPoint::FailedFlush, 40, 1000);
        assert!(result.passed, "{}", result.to_json());
        assert_eq!(result.acknowledged, 20);
    }

    #[test]
    fn test_after_durable_recovery() {
        let mut harness = CrashRecoveryHarness::memory(256 * 1024);
        let result = harness.run(CrashPoint::AfterDurable, 30, 500);
        assert!(result.passed, "{}", result.to_json());
        assert_eq!(result.recovered, 30);
    }

    #[test]
    fn test_directio_torn_write_recovery() {
        let config = JournalConfig::new("memory")
            .capacity_bytes(512 * 1024)
            .block_size(512)
            .directio(true)
            .identity(TEST_IDENTITY);
        let mut harness = CrashRecoveryHarness::with_config(config);
        let result = harness.run(CrashPoint::TornWrite { after_bytes: 9_000 }, 100, 700);
        assert!(result.passed, "{}", result.to_json());
    }
}
