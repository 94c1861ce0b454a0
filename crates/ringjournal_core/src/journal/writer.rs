//! The background writer thread.
//!
//! One writer per writable journal. It takes pending entries in submission
//! order, places them in the ring, writes each batch with as few physical
//! writes as the layout allows, waits for it to reach stable storage, and
//! then hands the batch's completions to the dispatcher in order.

use super::frame::{encode_entry, encode_wrap};
use super::header::{JournalHeader, HEADER_FLAG_CLEAN};
use super::ring::{Placement, RingSpace};
use crate::completion::Completion;
use crate::dispatcher::CompletionDispatcher;
use crate::error::{JournalError, JournalResult};
use crate::types::JournalState;
use parking_lot::{Condvar, Mutex};
use ringjournal_storage::StorageBackend;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A submitted entry waiting for the writer.
pub(super) struct PendingEntry {
    pub seq: u64,
    pub flags: u32,
    pub payload: Vec<u8>,
    pub frame_len: u64,
    pub completion: Completion,
}

/// State shared by callers and the writer thread.
pub(super) struct WriterState {
    pub phase: JournalState,
    pub ring: RingSpace,
    pub pending: VecDeque<PendingEntry>,
    pub in_flight: usize,
    /// Highest sequence accepted by `submit_entry`.
    pub last_submitted: u64,
    pub stop: bool,
    pub header: JournalHeader,
    /// Set when the trim position moved since the header was last written.
    pub header_dirty: bool,
    /// Zero the frame slot after each batch until the ring first wraps.
    /// Set after a replay that did not end at a clean close.
    pub scrub_tail: bool,
    pub failure: Option<String>,
    pub stalled: bool,
    pub batches_written: u64,
    pub bytes_written: u64,
    pub stalls: u64,
}

impl WriterState {
    pub fn new(ring: RingSpace, header: JournalHeader) -> Self {
        Self {
            phase: JournalState::Uninitialized,
            ring,
            pending: VecDeque::new(),
            in_flight: 0,
            last_submitted: 0,
            stop: false,
            header,
            header_dirty: false,
            scrub_tail: false,
            failure: None,
            stalled: false,
            batches_written: 0,
            bytes_written: 0,
            stalls: 0,
        }
    }

    /// Refreshes the header from the ring for a header write while writable.
    pub fn dirty_header(&mut self) -> JournalHeader {
        self.header.start = self.ring.trim_offset();
        self.header.committed_seq = self.ring.committed_seq();
        self.header.last_seq = self.header.last_seq.max(self.ring.last_placed());
        self.header.flags &= !HEADER_FLAG_CLEAN;
        self.header.live_bytes = 0;
        self.header_dirty = false;
        self.header.clone()
    }

    /// Refreshes the header for a clean close.
    pub fn clean_header(&mut self) -> JournalHeader {
        let mut header = self.dirty_header();
        header.flags |= HEADER_FLAG_CLEAN;
        header.live_bytes = self.ring.used();
        self.header = header.clone();
        header
    }

    /// Error to return to callers once the journal has failed.
    pub fn failed_error(&self) -> JournalError {
        JournalError::failed(
            self.failure
                .clone()
                .unwrap_or_else(|| "journal failed".to_string()),
        )
    }
}

/// Synchronization shared by the journal handle and its writer.
pub(super) struct Shared {
    pub state: Mutex<WriterState>,
    /// Wakes the writer: new entries, reclaimed space, or stop.
    pub work: Condvar,
    /// Wakes callers: durability advanced or the writer failed.
    pub progress: Condvar,
    pub dispatcher: Arc<dyn CompletionDispatcher>,
    pub max_batch_bytes: usize,
}

struct PlacedFrame {
    offset: u64,
    /// Wrap marker written ahead of this frame: (offset, sequence before it).
    marker: Option<(u64, u64)>,
    entry: PendingEntry,
}

#[derive(Default)]
struct Batch {
    header: Option<JournalHeader>,
    frames: Vec<PlacedFrame>,
    bytes: u64,
    /// Zeroed frame slot (offset, length) written after the last frame.
    scrub: Option<(u64, u64)>,
}

/// Starts the writer thread. It owns `backend` until it exits and hands it
/// back through the join handle.
pub(super) fn spawn(
    shared: Arc<Shared>,
    backend: Box<dyn StorageBackend>,
    identity: Uuid,
) -> JournalResult<JoinHandle<Box<dyn StorageBackend>>> {
    let alignment = shared.state.lock().ring.geometry().alignment;
    let writer = EntryWriter {
        shared,
        backend,
        identity,
        alignment,
        run: Vec::new(),
        run_start: 0,
    };
    let handle = std::thread::Builder::new()
        .name("ringjournal-writer".to_string())
        .spawn(move || writer.run())?;
    Ok(handle)
}

struct EntryWriter {
    shared: Arc<Shared>,
    backend: Box<dyn StorageBackend>,
    identity: Uuid,
    alignment: usize,
    run: Vec<u8>,
    run_start: u64,
}

impl EntryWriter {
    fn run(mut self) -> Box<dyn StorageBackend> {
        info!("journal writer started");
        while let Some(batch) = self.next_batch() {
            match self.write_batch(&batch) {
                Ok(()) => self.complete(batch),
                Err(err) => {
                    self.fail(&err, batch);
                    break;
                }
            }
        }
        info!("journal writer stopped");
        self.backend
    }

    /// Blocks until there is something to write, or returns `None` when the
    /// writer should exit.
    fn next_batch(&self) -> Option<Batch> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if state.phase != JournalState::Writable {
                return None;
            }
            if state.pending.is_empty() {
                if state.stop {
                    return None;
                }
                shared.work.wait(&mut state);
                continue;
            }

            let mut batch = Batch::default();
            while let Some(front) = state.pending.front() {
                let len = front.frame_len;
                if !batch.frames.is_empty()
                    && batch.bytes + len > shared.max_batch_bytes as u64
                {
                    break;
                }
                let placement = state.ring.reserve(len);
                if placement == Placement::Stall {
                    break;
                }
                let marker = match placement {
                    Placement::Wrap {
                        marker_offset: Some(at),
                        ..
                    } => Some((at, state.ring.last_placed())),
                    _ => None,
                };
                if matches!(placement, Placement::Wrap { .. }) && state.scrub_tail {
                    debug!("ring wrapped, tail scrubbing done");
                    state.scrub_tail = false;
                }
                let Some(entry) = state.pending.pop_front() else {
                    break;
                };
                let Some(offset) = state.ring.place(placement, entry.seq, len) else {
                    break;
                };
                batch.bytes += len;
                batch.frames.push(PlacedFrame {
                    offset,
                    marker,
                    entry,
                });
            }

            if batch.frames.is_empty() {
                if !state.stalled {
                    state.stalled = true;
                    state.stalls += 1;
                    warn!(
                        used = state.ring.used(),
                        capacity = state.ring.geometry().ring_len(),
                        committed = state.ring.committed_seq(),
                        "journal full, waiting for committed_thru"
                    );
                }
                shared.work.wait(&mut state);
                continue;
            }

            let head_len = state.ring.geometry().head_len();
            if state.scrub_tail && state.ring.free_ahead() >= head_len {
                batch.scrub = Some((state.ring.write_pos(), head_len));
            }
            state.stalled = false;
            state.in_flight = batch.frames.len();
            if state.header_dirty {
                batch.header = Some(state.dirty_header());
            }
            return Some(batch);
        }
    }

    fn write_batch(&mut self, batch: &Batch) -> JournalResult<()> {
        if let Some(header) = &batch.header {
            header.write_to(self.backend.as_mut())?;
            debug!(start = header.start, committed = header.committed_seq, "journal header updated");
        }

        self.run.clear();
        for frame in &batch.frames {
            if let Some((at, last_seq)) = frame.marker {
                self.begin(at)?;
                encode_wrap(&mut self.run, &self.identity, last_seq, self.alignment)?;
            }
            self.begin(frame.offset)?;
            let entry = &frame.entry;
            encode_entry(
                &mut self.run,
                &self.identity,
                entry.seq,
                entry.flags,
                &entry.payload,
                self.alignment,
            )?;
        }
        if let Some((at, len)) = batch.scrub {
            self.begin(at)?;
            self.run.resize(self.run.len() + len as usize, 0);
        }
        self.flush_run()?;
        self.backend.flush()?;
        Ok(())
    }

    /// Starts or continues the contiguous run for a frame at `offset`.
    fn begin(&mut self, offset: u64) -> JournalResult<()> {
        if !self.run.is_empty() && self.run_start + self.run.len() as u64 != offset {
            self.flush_run()?;
        }
        if self.run.is_empty() {
            self.run_start = offset;
        }
        Ok(())
    }

    fn flush_run(&mut self) -> JournalResult<()> {
        if self.run.is_empty() {
            return Ok(());
        }
        self.backend.write_at(self.run_start, &self.run)?;
        self.run.clear();
        Ok(())
    }

    fn complete(&self, batch: Batch) {
        let Some(last) = batch.frames.last().map(|f| f.entry.seq) else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            if state.ring.mark_durable(last) {
                state.header_dirty = true;
            }
            state.in_flight = 0;
            state.batches_written += 1;
            state.bytes_written += batch.bytes;
            self.shared.progress.notify_all();
        }
        debug!(
            entries = batch.frames.len(),
            bytes = batch.bytes,
            durable_seq = last,
            "journal batch durable"
        );
        for frame in batch.frames {
            self.shared.dispatcher.enqueue(frame.entry.completion);
        }
    }

    fn fail(&self, err: &JournalError, batch: Batch) {
        error!(error = %err, entries = batch.frames.len(), "journal write failed");
        let abandoned = {
            let mut state = self.shared.state.lock();
            state.phase = JournalState::Failed;
            state.failure = Some(err.to_string());
            state.in_flight = 0;
            self.shared.progress.notify_all();
            std::mem::take(&mut state.pending)
        };
        // completions of entries that never became durable are dropped unrun
        drop(abandoned);
        drop(batch);
    }
}
