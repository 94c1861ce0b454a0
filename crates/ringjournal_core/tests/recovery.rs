//! Recovery, backpressure, and failure behavior over in-memory backends.

use parking_lot::Mutex;
use ringjournal_core::{
    BackendOpener, Completion, CompletionWaiter, Finisher, GatherBuilder, Journal, JournalConfig,
    JournalError, JournalState, SequenceNumber,
};
use ringjournal_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const IDENTITY: Uuid = Uuid::from_bytes([0x42; 16]);

fn config(capacity: u64) -> JournalConfig {
    JournalConfig::new("memory")
        .capacity_bytes(capacity)
        .identity(IDENTITY)
}

fn finisher() -> Arc<Finisher> {
    let finisher = Arc::new(Finisher::new("recovery"));
    finisher.start().unwrap();
    finisher
}

fn opener<B>(backend: &B) -> BackendOpener
where
    B: StorageBackend + Clone + 'static,
{
    let backend = backend.clone();
    Arc::new(move |_config: &JournalConfig| Ok(Box::new(backend.clone()) as Box<dyn StorageBackend>))
}

fn journal_on<B>(backend: &B, config: JournalConfig, finisher: &Arc<Finisher>) -> Journal
where
    B: StorageBackend + Clone + 'static,
{
    Journal::with_backend_opener(config, finisher.clone(), opener(backend))
}

fn submit(journal: &Journal, seq: u64, payload: Vec<u8>) -> CompletionWaiter {
    let (done, waiter) = Completion::channel();
    journal
        .submit_entry(SequenceNumber::new(seq), payload, 0, done)
        .unwrap();
    waiter
}

fn replayed_seqs(journal: &Journal) -> Vec<u64> {
    let mut seqs = Vec::new();
    while let Some((_, seq)) = journal.read_entry().unwrap() {
        seqs.push(seq.as_u64());
    }
    seqs
}

/// Copy of the backing bytes, as a crash would leave them.
fn crash_image(backend: &InMemoryBackend) -> InMemoryBackend {
    InMemoryBackend::with_data(backend.data())
}

/// In-memory backend whose writes or syncs can be made to fail.
#[derive(Clone, Default)]
struct FlakyBackend {
    inner: InMemoryBackend,
    fail_writes: Arc<AtomicBool>,
    fail_syncs: Arc<AtomicBool>,
}

impl StorageBackend for FlakyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected sync failure",
            )));
        }
        self.inner.sync()
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.set_len(new_size)
    }
}

#[test]
fn crash_image_replays_durable_entries() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    for seq in 1..=3 {
        submit(&journal, seq, vec![seq as u8; 100]).wait();
    }

    let image = crash_image(&backend);
    let recovered = journal_on(&image, config(64 * 1024), &finisher);
    recovered.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(replayed_seqs(&recovered), vec![1, 2, 3]);
    recovered.close().unwrap();
    journal.close().unwrap();
}

#[test]
fn torn_tail_is_discarded_and_overwritten() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    for seq in 1..=3 {
        submit(&journal, seq, vec![seq as u8; 100]).wait();
    }

    let image = crash_image(&backend);
    // frames are 136 bytes; flip a payload byte of the third
    let third = 4096 + 2 * 136;
    image.poke(third + 40, &[0xEE]);

    let recovered = journal_on(&image, config(64 * 1024), &finisher);
    recovered.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(replayed_seqs(&recovered), vec![1, 2]);
    recovered.make_writeable().unwrap();
    submit(&recovered, 4, vec![4; 100]).wait();
    recovered.close().unwrap();

    recovered.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(replayed_seqs(&recovered), vec![1, 2, 4]);
    recovered.close().unwrap();
    journal.close().unwrap();
}

#[test]
fn resubmitted_tail_hides_frames_of_the_lost_tail() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    for seq in 1..=5 {
        submit(&journal, seq, vec![seq as u8; 100]).wait();
    }

    let image = crash_image(&backend);
    // 136 byte frames; entries 4 and 5 stay intact behind the bad third
    image.poke(4096 + 2 * 136 + 40, &[0xEE]);

    let recovered = journal_on(&image, config(64 * 1024), &finisher);
    recovered.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(replayed_seqs(&recovered), vec![1, 2]);
    recovered.make_writeable().unwrap();
    // same length, so the new frame ends where the old fourth begins
    submit(&recovered, 3, vec![0x33; 100]).wait();

    let second = crash_image(&image);
    let again = journal_on(&second, config(64 * 1024), &finisher);
    again.open(SequenceNumber::ZERO).unwrap();
    let mut entries = Vec::new();
    while let Some((payload, seq)) = again.read_entry().unwrap() {
        entries.push((seq.as_u64(), payload[0]));
    }
    assert_eq!(entries, vec![(1, 1), (2, 2), (3, 0x33)]);
    again.close().unwrap();
    recovered.close().unwrap();
    journal.close().unwrap();
}

#[test]
fn failed_create_leaves_nothing_to_open() {
    let finisher = finisher();
    let backend = FlakyBackend::default();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);

    backend.fail_syncs.store(true, Ordering::SeqCst);
    assert!(journal.create().unwrap_err().is_io());
    assert_eq!(journal.state(), JournalState::Uninitialized);
    assert!(matches!(
        journal.make_writeable(),
        Err(JournalError::InvalidState { .. })
    ));

    backend.fail_syncs.store(false, Ordering::SeqCst);
    let other = journal_on(&backend, config(64 * 1024), &finisher);
    assert!(matches!(
        other.open(SequenceNumber::ZERO),
        Err(JournalError::CorruptHeader { .. })
    ));
}

#[test]
fn failed_recreate_discards_the_old_journal() {
    let finisher = finisher();
    let backend = FlakyBackend::default();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    submit(&journal, 1, b"old".to_vec()).wait();
    journal.close().unwrap();

    backend.fail_syncs.store(true, Ordering::SeqCst);
    assert!(journal.create().is_err());
    assert_eq!(journal.state(), JournalState::Uninitialized);

    backend.fail_syncs.store(false, Ordering::SeqCst);
    assert!(matches!(
        journal.open(SequenceNumber::ZERO),
        Err(JournalError::CorruptHeader { .. })
    ));
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    submit(&journal, 1, b"new".to_vec()).wait();
    journal.close().unwrap();

    journal.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(journal.read_entry().unwrap(), Some((b"new".to_vec(), SequenceNumber::new(1))));
    journal.close().unwrap();
}

#[test]
fn corrupt_header_rejected() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    submit(&journal, 1, b"entry".to_vec()).wait();
    journal.close().unwrap();

    backend.poke(10, &[0xFF]);
    let err = journal.open(SequenceNumber::ZERO).unwrap_err();
    assert!(matches!(err, JournalError::CorruptHeader { .. }));
    assert_eq!(journal.state(), JournalState::Uninitialized);
}

#[test]
fn capacity_mismatch_rejected() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.close().unwrap();

    let other = journal_on(&backend, config(128 * 1024), &finisher);
    assert!(matches!(
        other.open(SequenceNumber::ZERO),
        Err(JournalError::CorruptHeader { .. })
    ));
}

fn fill_wrapped_ring(backend: &InMemoryBackend, finisher: &Arc<Finisher>) -> Journal {
    // 16 KiB ring, 1032 byte frames: 100 entries lap it several times
    let journal = journal_on(backend, config(4096 + 16 * 1024), finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    for seq in 1..=100u64 {
        submit(&journal, seq, vec![seq as u8; 1000]).wait();
        if seq > 3 {
            journal.committed_thru(SequenceNumber::new(seq - 3)).unwrap();
        }
    }
    let stats = journal.stats();
    assert_eq!(stats.stalls, 0);
    assert!(stats.bytes_written > 4 * 16 * 1024);
    journal
}

#[test]
fn wrapped_ring_replays_live_tail_after_crash() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = fill_wrapped_ring(&backend, &finisher);

    let image = crash_image(&backend);
    let recovered = journal_on(&image, config(4096 + 16 * 1024), &finisher);
    recovered.open(SequenceNumber::new(97)).unwrap();
    assert_eq!(replayed_seqs(&recovered), vec![98, 99, 100]);
    recovered.make_writeable().unwrap();
    submit(&recovered, 101, vec![101; 1000]).wait();
    recovered.close().unwrap();

    recovered.open(SequenceNumber::new(97)).unwrap();
    assert_eq!(replayed_seqs(&recovered), vec![98, 99, 100, 101]);
    recovered.close().unwrap();
    journal.close().unwrap();
}

#[test]
fn wrapped_ring_replays_live_tail_after_close() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = fill_wrapped_ring(&backend, &finisher);
    journal.close().unwrap();

    journal.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(replayed_seqs(&journal), vec![98, 99, 100]);
    journal.close().unwrap();
}

#[test]
fn full_ring_stalls_until_commit() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    // 8 KiB ring holds seven 1032 byte frames
    let journal = journal_on(&backend, config(4096 + 8 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();

    let waiters: Vec<_> = (1..=10u64)
        .map(|seq| submit(&journal, seq, vec![seq as u8; 1000]))
        .collect();
    waiters[6].wait();
    assert!(!waiters[7].wait_timeout(Duration::from_millis(200)));
    let stats = journal.stats();
    assert!(stats.stalls >= 1);
    assert_eq!(stats.durable_seq, 7);
    assert_eq!(stats.pending_entries, 3);

    journal.committed_thru(SequenceNumber::new(7)).unwrap();
    for waiter in &waiters[7..] {
        waiter.wait();
    }
    assert_eq!(journal.durable_seq(), SequenceNumber::new(10));
    journal.close().unwrap();

    journal.open(SequenceNumber::ZERO).unwrap();
    assert_eq!(replayed_seqs(&journal), vec![8, 9, 10]);
    journal.close().unwrap();
}

#[test]
fn completions_fire_in_sequence_order() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(
        &backend,
        config(1024 * 1024).max_batch_bytes(4096),
        &finisher,
    );
    journal.create().unwrap();
    journal.make_writeable().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done, waiter) = Completion::channel();
    let mut gather = GatherBuilder::new(done);
    for seq in 1..=500u64 {
        let order = Arc::clone(&order);
        let sub = gather.new_sub();
        let completion = Completion::new(move || {
            order.lock().push(seq);
            sub.complete();
        });
        journal
            .submit_entry(SequenceNumber::new(seq), vec![0; (seq % 97) as usize], 0, completion)
            .unwrap();
    }
    gather.activate();
    waiter.wait();

    assert_eq!(*order.lock(), (1..=500).collect::<Vec<_>>());
    assert!(journal.stats().batches_written > 1);
    journal.close().unwrap();
}

#[test]
fn committed_thru_is_monotonic() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    for seq in 1..=5 {
        submit(&journal, seq, vec![1; 10]).wait();
    }

    journal.committed_thru(SequenceNumber::new(4)).unwrap();
    journal.committed_thru(SequenceNumber::new(2)).unwrap();
    assert_eq!(journal.committed_seq(), SequenceNumber::new(4));
    assert_eq!(journal.stats().used_bytes, 48);
    journal.close().unwrap();
}

#[test]
fn write_failure_fails_the_instance() {
    let finisher = finisher();
    let backend = FlakyBackend::default();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();
    submit(&journal, 1, b"ok".to_vec()).wait();

    backend.fail_writes.store(true, Ordering::SeqCst);
    let lost = submit(&journal, 2, b"lost".to_vec());
    for _ in 0..1000 {
        if journal.state() == JournalState::Failed {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(journal.state(), JournalState::Failed);
    assert!(!lost.wait_timeout(Duration::from_millis(50)));

    let err = journal
        .submit_entry(SequenceNumber::new(3), b"x".to_vec(), 0, Completion::noop())
        .unwrap_err();
    assert!(matches!(err, JournalError::Failed { .. }));
    assert!(err.is_io());
    assert!(journal.committed_thru(SequenceNumber::new(1)).is_err());
    assert!(matches!(journal.close(), Err(JournalError::Failed { .. })));
    assert_eq!(journal.state(), JournalState::Failed);
}

#[test]
fn dropping_a_failed_journal_reaps_its_writer() {
    let finisher = finisher();
    let backend = FlakyBackend::default();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();

    backend.fail_writes.store(true, Ordering::SeqCst);
    let _lost = submit(&journal, 1, b"lost".to_vec());
    for _ in 0..1000 {
        if journal.state() == JournalState::Failed {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(journal.state(), JournalState::Failed);

    // the writer's clone of the backend is gone once drop returns
    drop(journal);
    assert_eq!(Arc::strong_count(&backend.fail_writes), 1);
}

#[test]
fn directio_writes_are_block_aligned() {
    let finisher = finisher();
    let backend = InMemoryBackend::with_block_size(512);
    let config = config(512 * 128).block_size(512).directio(true);
    let journal = journal_on(&backend, config.clone(), &finisher);
    journal.create().unwrap();
    journal.make_writeable().unwrap();

    let sizes = [1usize, 479, 480, 481, 512, 2000];
    for (i, size) in sizes.iter().enumerate() {
        submit(&journal, i as u64 + 1, vec![i as u8; *size]).wait();
    }
    assert_eq!(journal.state(), JournalState::Writable);
    assert_eq!(journal.stats().write_offset % 512, 0);
    journal.close().unwrap();

    journal.open(SequenceNumber::ZERO).unwrap();
    let mut count = 0;
    while let Some((payload, seq)) = journal.read_entry().unwrap() {
        let i = (seq.as_u64() - 1) as usize;
        assert_eq!(payload, vec![i as u8; sizes[i]]);
        count += 1;
    }
    assert_eq!(count, sizes.len());
    journal.close().unwrap();
}

#[test]
fn buffered_journal_cannot_be_opened_with_directio() {
    let finisher = finisher();
    let backend = InMemoryBackend::new();
    let journal = journal_on(&backend, config(64 * 1024), &finisher);
    journal.create().unwrap();
    journal.close().unwrap();

    let direct = journal_on(&backend, config(64 * 1024).directio(true), &finisher);
    assert!(matches!(
        direct.open(SequenceNumber::ZERO),
        Err(JournalError::CorruptHeader { .. })
    ));
}
