//! Stress tests for ringjournal.
//!
//! These drive a writable journal with sustained submissions, optionally
//! from several threads, while committing behind the writer so the ring
//! keeps wrapping.

use parking_lot::Mutex;
use ringjournal_core::{
    Completion, CompletionWaiter, GatherBuilder, Journal, SequenceNumber,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total entries submitted.
    pub total_ops: usize,
    /// Entries that became durable.
    pub successful_ops: usize,
    /// Submissions that were rejected.
    pub failed_ops: usize,
    /// Payload bytes made durable.
    pub bytes: u64,
    /// Total duration.
    pub duration: Duration,
    /// Entries per second.
    pub ops_per_second: f64,
    /// Payload megabytes per second.
    pub mb_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, bytes: u64, duration: Duration) -> Self {
        let total = successful + failed;
        let secs = duration.as_secs_f64();
        let (ops_per_second, mb_per_second) = if secs > 0.0 {
            (total as f64 / secs, bytes as f64 / (1024.0 * 1024.0) / secs)
        } else {
            (0.0, 0.0)
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            bytes,
            duration,
            ops_per_second,
            mb_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total entries: {}", self.total_ops);
        println!("Durable: {}", self.successful_ops);
        println!("Rejected: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} entries/sec", self.ops_per_second);
        println!("Bandwidth: {:.2} MB/sec", self.mb_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of entries to submit.
    pub entries: usize,
    /// Payload size in bytes.
    pub entry_size: usize,
    /// Number of submitting threads (for concurrent tests).
    pub threads: usize,
    /// How many entries may be durable but not yet committed.
    pub commit_lag: usize,
    /// Sequence number of the first entry.
    pub first_seq: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            entries: 10_000,
            entry_size: 256,
            threads: 4,
            commit_lag: 64,
            first_seq: 1,
        }
    }
}

/// Submits entries from one thread, committing `commit_lag` entries behind
/// the newest durable one.
pub fn stress_sequential_submits(journal: &Journal, config: &StressConfig) -> StressTestResult {
    let payload = vec![0xABu8; config.entry_size];
    let lag = config.commit_lag.max(1);

    let start = Instant::now();
    let mut failed = 0usize;
    let mut durable = 0usize;
    let mut outstanding: VecDeque<(u64, CompletionWaiter)> = VecDeque::new();

    for i in 0..config.entries {
        let seq = config.first_seq + i as u64;
        let (done, waiter) = Completion::channel();
        match journal.submit_entry(SequenceNumber::new(seq), payload.clone(), 0, done) {
            Ok(()) => outstanding.push_back((seq, waiter)),
            Err(_) => failed += 1,
        }
        while outstanding.len() > lag {
            if let Some((oldest, waiter)) = outstanding.pop_front() {
                waiter.wait();
                durable += 1;
                let _ = journal.committed_thru(SequenceNumber::new(oldest));
            }
        }
    }
    for (seq, waiter) in outstanding {
        waiter.wait();
        durable += 1;
        let _ = journal.committed_thru(SequenceNumber::new(seq));
    }

    let bytes = (durable * config.entry_size) as u64;
    StressTestResult::new(durable, failed, bytes, start.elapsed())
}

/// Submits entries from `threads` threads at once.
///
/// Sequence assignment and submission happen under one lock so the journal
/// sees increasing numbers. Every entry also joins one gathered completion,
/// which the run waits on before returning.
pub fn stress_concurrent_submits(journal: &Journal, config: &StressConfig) -> StressTestResult {
    let threads = config.threads.max(1);
    let per_thread = config.entries / threads;
    let next_seq = Mutex::new(config.first_seq);
    let (done, all_durable) = Completion::channel();
    let gather = Mutex::new(GatherBuilder::new(done));

    let start = Instant::now();
    let (successful, failed) = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    let payload = vec![0xCDu8; config.entry_size];
                    let mut successful = 0usize;
                    let mut failed = 0usize;
                    for _ in 0..per_thread {
                        let (done, waiter) = Completion::channel();
                        let seq = {
                            let mut next = next_seq.lock();
                            let seq = *next;
                            let sub = gather.lock().new_sub();
                            let submitted = journal.submit_entry(
                                SequenceNumber::new(seq),
                                payload.clone(),
                                0,
                                Completion::new(move || {
                                    sub.complete();
                                    done.complete();
                                }),
                            );
                            if submitted.is_err() {
                                failed += 1;
                                continue;
                            }
                            *next += 1;
                            seq
                        };
                        waiter.wait();
                        successful += 1;
                        if seq % config.commit_lag.max(1) as u64 == 0 {
                            let _ = journal.committed_thru(SequenceNumber::new(seq));
                        }
                    }
                    (successful, failed)
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .fold((0, 0), |(ok, err), (s, f)| (ok + s, err + f))
    });

    gather.into_inner().activate();
    // A rejected submission drops its sub, so the gather can only fire
    // when nothing was rejected.
    if failed == 0 {
        all_durable.wait();
    }

    let bytes = (successful * config.entry_size) as u64;
    StressTestResult::new(successful, failed, bytes, start.elapsed())
}
