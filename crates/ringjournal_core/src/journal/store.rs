//! The public journal handle.

use super::frame::framed_len;
use super::header::JournalHeader;
use super::replay::{RingScanner, ScanEnd};
use super::ring::{LiveEntry, RingGeometry, RingSpace};
use super::writer::{self, PendingEntry, Shared, WriterState};
use crate::completion::Completion;
use crate::config::JournalConfig;
use crate::dispatcher::CompletionDispatcher;
use crate::error::{JournalError, JournalResult};
use crate::types::{JournalState, JournalStats, SequenceNumber};
use parking_lot::{Condvar, Mutex};
use ringjournal_storage::{FileBackend, StorageBackend, StorageResult};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Opens the backing store for a configuration.
pub type BackendOpener =
    Arc<dyn Fn(&JournalConfig) -> StorageResult<Box<dyn StorageBackend>> + Send + Sync>;

struct ReplaySession {
    header: JournalHeader,
    scanner: RingScanner,
    live: VecDeque<LiveEntry>,
    /// Entries at or below this sequence are already applied by the caller.
    skip_thru: u64,
}

#[derive(Default)]
struct Control {
    backend: Option<Box<dyn StorageBackend>>,
    header: Option<JournalHeader>,
    replay: Option<ReplaySession>,
    writer: Option<JoinHandle<Box<dyn StorageBackend>>>,
}

/// A durable, append-only ring-buffer journal.
///
/// Lifecycle: [`create`](Self::create) or [`open`](Self::open), then
/// [`read_entry`](Self::read_entry) until it returns `None` (after open),
/// then [`make_writeable`](Self::make_writeable), then any number of
/// [`submit_entry`](Self::submit_entry) and
/// [`committed_thru`](Self::committed_thru) calls, then
/// [`close`](Self::close). A closed journal may be opened again.
///
/// `submit_entry` and `committed_thru` may be called from any thread.
/// Lifecycle operations are serialized internally.
///
/// # Example
///
/// ```rust,no_run
/// use ringjournal_core::{Completion, Finisher, Journal, JournalConfig, SequenceNumber};
/// use std::sync::Arc;
///
/// let finisher = Arc::new(Finisher::new("journal"));
/// finisher.start()?;
/// let journal = Journal::new(JournalConfig::new("/tmp/journal"), finisher.clone());
///
/// journal.create()?;
/// journal.make_writeable()?;
/// let (done, waiter) = Completion::channel();
/// journal.submit_entry(SequenceNumber::new(1), b"small".to_vec(), 0, done)?;
/// waiter.wait();
/// journal.committed_thru(SequenceNumber::new(1))?;
/// journal.close()?;
/// # Ok::<(), ringjournal_core::JournalError>(())
/// ```
pub struct Journal {
    config: JournalConfig,
    opener: BackendOpener,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl Journal {
    /// Creates a handle that stores the journal in a file at the
    /// configured path.
    #[must_use]
    pub fn new(config: JournalConfig, dispatcher: Arc<dyn CompletionDispatcher>) -> Self {
        let opener: BackendOpener = Arc::new(|config: &JournalConfig| {
            let backend =
                FileBackend::open_with_create_dirs(&config.backing_path, config.backend_block_size())?;
            Ok(Box::new(backend) as Box<dyn StorageBackend>)
        });
        Self::with_backend_opener(config, dispatcher, opener)
    }

    /// Creates a handle that obtains its backing store from `opener`.
    #[must_use]
    pub fn with_backend_opener(
        config: JournalConfig,
        dispatcher: Arc<dyn CompletionDispatcher>,
        opener: BackendOpener,
    ) -> Self {
        let header = JournalHeader::new(&config);
        let ring = RingSpace::new(RingGeometry::new(
            config.ring_start(),
            config.capacity_bytes,
            config.frame_alignment(),
        ));
        let shared = Arc::new(Shared {
            state: Mutex::new(WriterState::new(ring, header)),
            work: Condvar::new(),
            progress: Condvar::new(),
            dispatcher,
            max_batch_bytes: config.max_batch_bytes,
        });
        Self {
            config,
            opener,
            shared,
            control: Mutex::new(Control::default()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JournalState {
        self.shared.state.lock().phase
    }

    /// Highest sequence confirmed on stable storage.
    #[must_use]
    pub fn durable_seq(&self) -> SequenceNumber {
        SequenceNumber(self.shared.state.lock().ring.durable_seq())
    }

    /// Highest sequence the caller reported applied.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber(self.shared.state.lock().ring.committed_seq())
    }

    /// Snapshot of the journal's cursors and counters.
    #[must_use]
    pub fn stats(&self) -> JournalStats {
        let state = self.shared.state.lock();
        JournalStats {
            state: state.phase,
            write_offset: state.ring.write_pos(),
            trim_offset: state.ring.trim_offset(),
            used_bytes: state.ring.used(),
            ring_capacity: state.ring.geometry().ring_len(),
            durable_seq: state.ring.durable_seq(),
            committed_seq: state.ring.committed_seq(),
            pending_entries: state.pending.len() + state.in_flight,
            batches_written: state.batches_written,
            bytes_written: state.bytes_written,
            stalls: state.stalls,
        }
    }

    fn set_phase(&self, phase: JournalState) {
        self.shared.state.lock().phase = phase;
    }

    fn open_backend(&self) -> JournalResult<Box<dyn StorageBackend>> {
        Ok((self.opener)(&self.config)?)
    }

    /// Initializes a new, empty journal, replacing whatever the backing
    /// store held.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, [`JournalError::InvalidState`] if the
    /// journal is open, or a storage error if the store cannot be sized or
    /// written.
    pub fn create(&self) -> JournalResult<()> {
        let mut control = self.control.lock();
        let phase = self.state();
        if !matches!(
            phase,
            JournalState::Uninitialized | JournalState::Closed | JournalState::Created
        ) {
            return Err(JournalError::invalid_state(format!(
                "cannot create a journal that is {phase}"
            )));
        }
        self.config.validate()?;
        control.backend = None;
        control.header = None;

        let mut backend = match self.open_backend() {
            Ok(backend) => backend,
            Err(err) => {
                self.set_phase(JournalState::Uninitialized);
                return Err(err);
            }
        };
        let header = JournalHeader::new(&self.config);
        if let Err(err) = self.format(backend.as_mut(), &header) {
            // a header that reached the store must not validate at open
            if backend.set_len(0).is_err()
                && backend.write_at(0, &vec![0u8; header.encode().len()]).is_ok()
            {
                let _ = backend.flush();
            }
            drop(backend);
            self.set_phase(JournalState::Uninitialized);
            warn!(
                path = %self.config.backing_path.display(),
                error = %err,
                "journal create failed"
            );
            return Err(err);
        }

        control.backend = Some(backend);
        control.header = Some(header);
        self.set_phase(JournalState::Created);
        info!(
            path = %self.config.backing_path.display(),
            capacity = self.config.capacity_bytes,
            directio = self.config.directio,
            identity = %self.config.identity,
            "journal created"
        );
        Ok(())
    }

    /// Sizes the store to the configured capacity, zero-filled, and writes a
    /// fresh header.
    fn format(
        &self,
        backend: &mut dyn StorageBackend,
        header: &JournalHeader,
    ) -> JournalResult<()> {
        backend.set_len(0)?;
        backend.set_len(self.config.capacity_bytes)?;
        header.write_to(backend)?;
        backend.sync()?;
        Ok(())
    }

    /// Opens an existing journal and positions it for replay.
    ///
    /// `last_known` is the highest sequence the caller has already applied;
    /// [`read_entry`](Self::read_entry) skips entries at or below it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CorruptHeader`] when the header is missing,
    /// damaged, or belongs to another journal, and a storage error when the
    /// store cannot be opened.
    pub fn open(&self, last_known: SequenceNumber) -> JournalResult<()> {
        let mut control = self.control.lock();
        let phase = self.state();
        if !matches!(
            phase,
            JournalState::Uninitialized | JournalState::Closed | JournalState::Created
        ) {
            return Err(JournalError::invalid_state(format!(
                "cannot open a journal that is {phase}"
            )));
        }
        self.config.validate()?;

        let result = self.open_session(&mut control, last_known.as_u64());
        if result.is_err() {
            control.backend = None;
            control.header = None;
            control.replay = None;
            self.set_phase(JournalState::Uninitialized);
        }
        result
    }

    fn open_session(&self, control: &mut Control, last_known: u64) -> JournalResult<()> {
        let backend = match control.backend.take() {
            Some(backend) => backend,
            None => self.open_backend()?,
        };
        let header = JournalHeader::read_from(backend.as_ref(), self.config.block_size)?;
        header.validate_against(&self.config)?;
        let size = backend.size()?;
        if size < header.capacity {
            return Err(JournalError::corrupt_header(format!(
                "backing store holds {size} bytes, header records {}",
                header.capacity
            )));
        }

        let skip_thru = last_known.max(header.committed_seq);
        info!(
            path = %self.config.backing_path.display(),
            start = header.start,
            committed = header.committed_seq,
            clean = header.is_clean(),
            last_known,
            "journal opened"
        );
        control.replay = Some(ReplaySession {
            scanner: RingScanner::new(&header),
            live: VecDeque::new(),
            skip_thru,
            header: header.clone(),
        });
        control.header = Some(header);
        control.backend = Some(backend);
        self.set_phase(JournalState::Replaying);
        Ok(())
    }

    /// Returns the next entry after the one the caller last applied, or
    /// `None` once replay is complete.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] outside replay, or a storage
    /// error if the read fails. Damaged frames end replay instead of failing.
    pub fn read_entry(&self) -> JournalResult<Option<(Vec<u8>, SequenceNumber)>> {
        let mut control = self.control.lock();
        let phase = self.state();
        if phase != JournalState::Replaying {
            return Err(JournalError::invalid_state(format!(
                "read_entry requires a replaying journal, journal is {phase}"
            )));
        }
        let Control {
            backend, replay, ..
        } = &mut *control;
        let (Some(backend), Some(session)) = (backend.as_ref(), replay.as_mut()) else {
            return Err(JournalError::invalid_state("replay session missing"));
        };

        while let Some(entry) = session.scanner.next_entry(backend.as_ref())? {
            session.live.push_back(LiveEntry {
                seq: entry.seq,
                offset: entry.offset,
                len: entry.frame_len,
            });
            if entry.seq <= session.skip_thru {
                continue;
            }
            return Ok(Some((entry.payload, SequenceNumber(entry.seq))));
        }
        Ok(None)
    }

    /// Starts accepting submissions.
    ///
    /// After [`open`](Self::open), any entries not yet read are scanned so
    /// the write position lands after the last valid entry.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] unless the journal was just
    /// created or opened.
    pub fn make_writeable(&self) -> JournalResult<()> {
        let mut control = self.control.lock();
        let phase = self.state();
        let geometry = RingGeometry::new(
            self.config.ring_start(),
            self.config.capacity_bytes,
            self.config.frame_alignment(),
        );

        let (ring, header, scrub_tail) = match phase {
            JournalState::Created => {
                let header = control
                    .header
                    .clone()
                    .unwrap_or_else(|| JournalHeader::new(&self.config));
                (RingSpace::new(geometry), header, false)
            }
            JournalState::Replaying => {
                let Control {
                    backend, replay, ..
                } = &mut *control;
                let (Some(backend), Some(mut session)) = (backend.as_ref(), replay.take()) else {
                    return Err(JournalError::invalid_state("replay session missing"));
                };
                while let Some(entry) = session.scanner.next_entry(backend.as_ref())? {
                    session.live.push_back(LiveEntry {
                        seq: entry.seq,
                        offset: entry.offset,
                        len: entry.frame_len,
                    });
                }
                let last_seq = session
                    .scanner
                    .last_seq()
                    .max(session.header.last_seq)
                    .max(session.header.committed_seq);
                let ring = RingSpace::restore(
                    geometry,
                    session.scanner.position(),
                    session.live,
                    last_seq,
                    session.skip_thru,
                );
                debug!(
                    write_pos = ring.write_pos(),
                    trim = ring.trim_offset(),
                    live = ring.live_entries(),
                    last_seq,
                    end = ?session.scanner.end(),
                    "replay complete"
                );
                // frames of a lost tail may still sit past the write position
                let scrub_tail = !matches!(session.scanner.end(), Some(ScanEnd::Clean));
                (ring, session.header, scrub_tail)
            }
            other => {
                return Err(JournalError::invalid_state(format!(
                    "cannot make a {other} journal writable"
                )));
            }
        };

        let Some(backend) = control.backend.take() else {
            return Err(JournalError::invalid_state("no backing store attached"));
        };
        {
            let mut state = self.shared.state.lock();
            state.last_submitted = ring.last_placed().max(ring.committed_seq());
            state.ring = ring;
            state.header = header;
            // the clean marker must be cleared before the first frame lands
            state.header_dirty = true;
            state.scrub_tail = scrub_tail;
            state.pending.clear();
            state.in_flight = 0;
            state.stop = false;
            state.failure = None;
            state.stalled = false;
            state.batches_written = 0;
            state.bytes_written = 0;
            state.stalls = 0;
            state.phase = JournalState::Writable;
        }

        match writer::spawn(Arc::clone(&self.shared), backend, self.config.identity) {
            Ok(handle) => control.writer = Some(handle),
            Err(err) => {
                self.set_phase(JournalState::Failed);
                return Err(err);
            }
        }
        info!(path = %self.config.backing_path.display(), "journal writable");
        Ok(())
    }

    /// Queues an entry. `completion` is dispatched once the entry, and
    /// every entry before it, is durable.
    ///
    /// Returns without waiting for I/O. When the ring is full the entry
    /// waits in the queue until [`committed_thru`](Self::committed_thru)
    /// frees space.
    ///
    /// # Errors
    ///
    /// - [`JournalError::CapacityExceeded`] if the entry can never fit
    /// - [`JournalError::InvalidSequence`] if `seq` does not advance
    /// - [`JournalError::Failed`] after a write failure
    /// - [`JournalError::InvalidState`] if the journal is not writable
    pub fn submit_entry(
        &self,
        seq: SequenceNumber,
        payload: Vec<u8>,
        flags: u32,
        completion: Completion,
    ) -> JournalResult<()> {
        let frame_len = framed_len(payload.len(), self.config.frame_alignment());
        let capacity = self.config.capacity_bytes.saturating_sub(self.config.ring_start());
        if frame_len > capacity || u32::try_from(frame_len).is_err() {
            return Err(JournalError::CapacityExceeded {
                frame_len,
                capacity,
            });
        }

        let mut state = self.shared.state.lock();
        match state.phase {
            JournalState::Writable if !state.stop => {}
            JournalState::Failed => return Err(state.failed_error()),
            JournalState::Writable => {
                return Err(JournalError::invalid_state("journal is closing"));
            }
            other => {
                return Err(JournalError::invalid_state(format!(
                    "cannot submit to a {other} journal"
                )));
            }
        }
        let seq = seq.as_u64();
        if seq <= state.last_submitted {
            return Err(JournalError::InvalidSequence {
                seq,
                last: state.last_submitted,
            });
        }

        state.last_submitted = seq;
        state.pending.push_back(PendingEntry {
            seq,
            flags,
            payload,
            frame_len,
            completion,
        });
        self.shared.work.notify_one();
        Ok(())
    }

    /// Reports that the caller has applied everything through `seq`, so
    /// that space can be reclaimed. Values at or below the current mark are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Failed`] after a write failure, or
    /// [`JournalError::InvalidState`] if the journal is not writable.
    pub fn committed_thru(&self, seq: SequenceNumber) -> JournalResult<()> {
        let mut state = self.shared.state.lock();
        match state.phase {
            JournalState::Writable => {}
            JournalState::Failed => return Err(state.failed_error()),
            other => {
                return Err(JournalError::invalid_state(format!(
                    "committed_thru requires a writable journal, journal is {other}"
                )));
            }
        }
        if state.ring.commit_thru(seq.as_u64()) {
            state.header_dirty = true;
            self.shared.work.notify_one();
        }
        Ok(())
    }

    /// Waits for every queued entry to become durable and its completion
    /// to be dispatched, records a clean shutdown, and releases the backing
    /// store.
    ///
    /// Closing a closed or never-opened journal does nothing. If the ring is
    /// full, `close` waits for `committed_thru` like the writer does.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Failed`] if a write failed at any point
    /// during this session.
    pub fn close(&self) -> JournalResult<()> {
        let mut control = self.control.lock();
        let phase = self.state();
        match phase {
            JournalState::Uninitialized | JournalState::Closed => return Ok(()),
            JournalState::Created | JournalState::Replaying => {
                control.backend = None;
                control.replay = None;
                control.header = None;
                self.set_phase(JournalState::Closed);
                info!(path = %self.config.backing_path.display(), "journal closed");
                return Ok(());
            }
            JournalState::Writable | JournalState::Failed => {}
        }

        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.work.notify_all();
        }
        let backend = match control.writer.take() {
            Some(handle) => match handle.join() {
                Ok(backend) => Some(backend),
                Err(_) => {
                    let mut state = self.shared.state.lock();
                    state.phase = JournalState::Failed;
                    state.failure = Some("journal writer panicked".to_string());
                    None
                }
            },
            None => None,
        };

        let header = {
            let mut state = self.shared.state.lock();
            if state.phase == JournalState::Failed {
                let err = state.failed_error();
                drop(state);
                control.backend = None;
                warn!(error = %err, "closing failed journal");
                return Err(err);
            }
            state.clean_header()
        };

        let Some(mut backend) = backend else {
            return Err(JournalError::invalid_state("no backing store attached"));
        };
        let written = header
            .write_to(backend.as_mut())
            .and_then(|()| backend.sync().map_err(JournalError::from));
        if let Err(err) = written {
            let mut state = self.shared.state.lock();
            state.phase = JournalState::Failed;
            state.failure = Some(err.to_string());
            return Err(state.failed_error());
        }

        control.header = Some(header.clone());
        self.set_phase(JournalState::Closed);
        info!(
            path = %self.config.backing_path.display(),
            start = header.start,
            live_bytes = header.live_bytes,
            committed = header.committed_seq,
            "journal closed"
        );
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        // a failed journal still holds its exited writer until close reaps it
        let running =
            self.state() == JournalState::Writable || self.control.lock().writer.is_some();
        if running {
            if let Err(err) = self.close() {
                debug!(
                    path = %self.config.backing_path.display(),
                    error = %err,
                    "close on drop failed"
                );
            }
        }
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.config.backing_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
