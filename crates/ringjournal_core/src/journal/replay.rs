//! Sequential scan of the ring for replay.

use super::frame::{decode_frame_header, verify_frame, FrameKind, FRAME_HEADER_LEN};
use super::header::JournalHeader;
use super::ring::RingGeometry;
use crate::error::{JournalError, JournalResult};
use ringjournal_storage::StorageBackend;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a scan stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanEnd {
    /// Consumed the live bytes recorded by a clean close.
    Clean,
    /// Reached bytes that were never written.
    Unwritten {
        /// Ring offset where the scan stopped.
        offset: u64,
    },
    /// Reached a frame that failed validation.
    Corrupt {
        /// Ring offset of the bad frame.
        offset: u64,
        /// Description of the failure.
        reason: String,
    },
    /// Reached a frame left over from an earlier lap.
    Stale {
        /// Ring offset of the stale frame.
        offset: u64,
        /// Its sequence number.
        seq: u64,
    },
    /// Covered the whole ring.
    RingCovered,
}

/// An entry produced by [`RingScanner::next_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    /// Entry sequence.
    pub seq: u64,
    /// Caller flags.
    pub flags: u32,
    /// Ring offset of the frame.
    pub offset: u64,
    /// Frame length.
    pub frame_len: u64,
    /// Entry payload.
    pub payload: Vec<u8>,
}

/// Walks frames from the persisted start position.
///
/// The scanner never fails on bad data: a frame that does not validate ends
/// the scan and [`RingScanner::end`] says why. Only storage errors are
/// returned as `Err`.
#[derive(Debug)]
pub struct RingScanner {
    geometry: RingGeometry,
    identity: Uuid,
    pos: u64,
    consumed: u64,
    limit: Option<u64>,
    last_seq: u64,
    entries: u64,
    end: Option<ScanEnd>,
}

impl RingScanner {
    /// Creates a scanner positioned at the header's start offset.
    #[must_use]
    pub fn new(header: &JournalHeader) -> Self {
        Self {
            geometry: header.geometry(),
            identity: header.identity,
            pos: header.start,
            consumed: 0,
            limit: header.is_clean().then_some(header.live_bytes),
            last_seq: 0,
            entries: 0,
            end: None,
        }
    }

    /// Position just past the last valid frame.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Highest sequence seen.
    #[must_use]
    pub const fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Entries produced so far.
    #[must_use]
    pub const fn entries(&self) -> u64 {
        self.entries
    }

    /// Why the scan stopped, once it has.
    #[must_use]
    pub const fn end(&self) -> Option<&ScanEnd> {
        self.end.as_ref()
    }

    /// Returns whether the scan has stopped.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    fn finish(&mut self, end: ScanEnd) {
        match &end {
            ScanEnd::Corrupt { offset, reason } => {
                warn!(offset, reason = %reason, entries = self.entries, "replay stopped at corrupt frame");
            }
            other => {
                debug!(end = ?other, entries = self.entries, last_seq = self.last_seq, "replay finished");
            }
        }
        self.end = Some(end);
    }

    fn jump_to_start(&mut self) {
        self.consumed += self.geometry.ring_end - self.pos;
        self.pos = self.geometry.ring_start;
    }

    /// Reads the next entry, or `None` once the scan has stopped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend fails.
    pub fn next_entry(&mut self, backend: &dyn StorageBackend) -> JournalResult<Option<ScannedEntry>> {
        let head_len = self.geometry.head_len();
        loop {
            if self.end.is_some() {
                return Ok(None);
            }
            if let Some(limit) = self.limit {
                if self.consumed >= limit {
                    self.finish(ScanEnd::Clean);
                    continue;
                }
            }
            if self.consumed >= self.geometry.ring_len() {
                self.finish(ScanEnd::RingCovered);
                continue;
            }
            if self.geometry.ring_end - self.pos < head_len {
                self.jump_to_start();
                continue;
            }

            let offset = self.pos;
            let head = backend.read_at(offset, head_len as usize)?;
            let header = match decode_frame_header(&head, offset, self.geometry.alignment) {
                Ok(header) => header,
                Err(err) => {
                    let end = if head[..FRAME_HEADER_LEN].iter().all(|&b| b == 0) {
                        ScanEnd::Unwritten { offset }
                    } else {
                        corrupt(offset, &err)
                    };
                    self.finish(end);
                    continue;
                }
            };

            let frame_len = u64::from(header.frame_len);
            if frame_len > self.geometry.ring_end - offset {
                self.finish(ScanEnd::Corrupt {
                    offset,
                    reason: format!("frame of {frame_len} bytes runs past the ring end"),
                });
                continue;
            }

            match header.kind {
                FrameKind::Wrap => {
                    if let Err(err) = verify_frame(&self.identity, &header, &head, &[], offset) {
                        self.finish(corrupt(offset, &err));
                        continue;
                    }
                    // a marker always carries the sequence of the entry before it
                    if self.entries > 0 && header.seq != self.last_seq {
                        self.finish(ScanEnd::Stale {
                            offset,
                            seq: header.seq,
                        });
                        continue;
                    }
                    self.jump_to_start();
                }
                FrameKind::Entry => {
                    let mut bytes = head;
                    if frame_len > head_len {
                        let rest = backend.read_at(offset + head_len, (frame_len - head_len) as usize)?;
                        bytes.extend_from_slice(&rest);
                    }
                    let payload_end = FRAME_HEADER_LEN + header.payload_len as usize;
                    let payload = &bytes[FRAME_HEADER_LEN..payload_end];
                    if let Err(err) = verify_frame(&self.identity, &header, &bytes, payload, offset) {
                        self.finish(corrupt(offset, &err));
                        continue;
                    }
                    if self.entries > 0 && header.seq <= self.last_seq {
                        self.finish(ScanEnd::Stale {
                            offset,
                            seq: header.seq,
                        });
                        continue;
                    }

                    let payload = payload.to_vec();
                    self.pos = offset + frame_len;
                    self.consumed += frame_len;
                    self.last_seq = header.seq;
                    self.entries += 1;
                    return Ok(Some(ScannedEntry {
                        seq: header.seq,
                        flags: header.flags,
                        offset,
                        frame_len,
                        payload,
                    }));
                }
            }
        }
    }
}

fn corrupt(offset: u64, err: &JournalError) -> ScanEnd {
    let reason = match err {
        JournalError::CorruptEntry { message, .. } => message.clone(),
        other => other.to_string(),
    };
    ScanEnd::Corrupt { offset, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::journal::frame::{encode_entry, encode_wrap};
    use ringjournal_storage::InMemoryBackend;

    const CAPACITY: u64 = 4096 + 1024;

    fn setup() -> (JournalHeader, InMemoryBackend) {
        let config = JournalConfig::new("/tmp/scan")
            .capacity_bytes(CAPACITY)
            .identity(Uuid::from_bytes([5; 16]));
        let header = JournalHeader::new(&config);
        let mut backend = InMemoryBackend::new();
        backend.set_len(CAPACITY).unwrap();
        (header, backend)
    }

    fn put(backend: &mut InMemoryBackend, header: &JournalHeader, offset: u64, seq: u64, payload: &[u8]) -> u64 {
        let mut buf = Vec::new();
        let len = encode_entry(&mut buf, &header.identity, seq, 0, payload, 8).unwrap();
        backend.write_at(offset, &buf).unwrap();
        offset + len
    }

    fn drain(scanner: &mut RingScanner, backend: &InMemoryBackend) -> Vec<u64> {
        let mut seqs = Vec::new();
        while let Some(entry) = scanner.next_entry(backend).unwrap() {
            seqs.push(entry.seq);
        }
        seqs
    }

    #[test]
    fn empty_ring_is_unwritten() {
        let (mut header, backend) = setup();
        header.flags = 0;
        let mut scanner = RingScanner::new(&header);
        assert!(scanner.next_entry(&backend).unwrap().is_none());
        assert_eq!(scanner.end(), Some(&ScanEnd::Unwritten { offset: 4096 }));
        assert_eq!(scanner.position(), 4096);
    }

    #[test]
    fn clean_header_with_no_live_bytes_stops_immediately() {
        let (header, mut backend) = setup();
        put(&mut backend, &header, 4096, 1, b"stale");
        let mut scanner = RingScanner::new(&header);
        assert!(drain(&mut scanner, &backend).is_empty());
        assert_eq!(scanner.end(), Some(&ScanEnd::Clean));
    }

    #[test]
    fn reads_entries_in_order() {
        let (mut header, mut backend) = setup();
        header.flags = 0;
        let mut pos = 4096;
        for seq in 1..=3 {
            pos = put(&mut backend, &header, pos, seq, b"entry");
        }
        let mut scanner = RingScanner::new(&header);
        assert_eq!(drain(&mut scanner, &backend), vec![1, 2, 3]);
        assert_eq!(scanner.position(), pos);
        assert_eq!(scanner.last_seq(), 3);
    }

    #[test]
    fn stops_at_sequence_regression() {
        let (mut header, mut backend) = setup();
        header.flags = 0;
        let mut pos = 4096;
        pos = put(&mut backend, &header, pos, 10, b"new");
        let stale_at = put(&mut backend, &header, pos, 11, b"new");
        put(&mut backend, &header, stale_at, 4, b"old lap");

        let mut scanner = RingScanner::new(&header);
        assert_eq!(drain(&mut scanner, &backend), vec![10, 11]);
        assert_eq!(
            scanner.end(),
            Some(&ScanEnd::Stale {
                offset: stale_at,
                seq: 4
            })
        );
    }

    #[test]
    fn stops_at_torn_frame() {
        let (mut header, mut backend) = setup();
        header.flags = 0;
        let torn_at = put(&mut backend, &header, 4096, 1, b"good");
        put(&mut backend, &header, torn_at, 2, b"torn payload");
        backend.poke(torn_at as usize + 40, b"X");

        let mut scanner = RingScanner::new(&header);
        assert_eq!(drain(&mut scanner, &backend), vec![1]);
        assert!(matches!(scanner.end(), Some(ScanEnd::Corrupt { offset, .. }) if *offset == torn_at));
        assert_eq!(scanner.position(), torn_at);
    }

    #[test]
    fn follows_wrap_marker() {
        let (mut header, mut backend) = setup();
        header.flags = 0;
        // seq 1 fills most of the ring, seq 2 wraps to the start
        header.start = 4096 + 512;
        let after = put(&mut backend, &header, header.start, 1, &[1u8; 400]);
        let mut marker = Vec::new();
        encode_wrap(&mut marker, &header.identity, 1, 8).unwrap();
        backend.write_at(after, &marker).unwrap();
        put(&mut backend, &header, 4096, 2, b"wrapped");

        let mut scanner = RingScanner::new(&header);
        assert_eq!(drain(&mut scanner, &backend), vec![1, 2]);
    }

    #[test]
    fn stale_wrap_marker_ends_scan() {
        let (mut header, mut backend) = setup();
        header.flags = 0;
        let after = put(&mut backend, &header, 4096, 7, b"entry");
        let mut marker = Vec::new();
        encode_wrap(&mut marker, &header.identity, 3, 8).unwrap();
        backend.write_at(after, &marker).unwrap();

        let mut scanner = RingScanner::new(&header);
        assert_eq!(drain(&mut scanner, &backend), vec![7]);
        assert!(matches!(scanner.end(), Some(ScanEnd::Stale { seq: 3, .. })));
    }

    #[test]
    fn clean_limit_stops_before_stale_data() {
        let (mut header, mut backend) = setup();
        let after_one = put(&mut backend, &header, 4096, 1, b"live");
        put(&mut backend, &header, after_one, 2, b"beyond");
        header.live_bytes = after_one - 4096;

        let mut scanner = RingScanner::new(&header);
        assert_eq!(drain(&mut scanner, &backend), vec![1]);
        assert_eq!(scanner.end(), Some(&ScanEnd::Clean));
    }
}
