//! Ring space accounting.
//!
//! [`RingSpace`] decides where each frame goes and when space can be
//! reclaimed. It does no I/O; the writer applies its placements.

use super::frame::{align_up, FRAME_HEADER_LEN};
use std::collections::VecDeque;

/// Fixed layout of the ring inside the journal file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    /// First ring byte.
    pub ring_start: u64,
    /// One past the last ring byte.
    pub ring_end: u64,
    /// Frame alignment.
    pub alignment: usize,
}

impl RingGeometry {
    /// Creates a geometry.
    #[must_use]
    pub const fn new(ring_start: u64, ring_end: u64, alignment: usize) -> Self {
        Self {
            ring_start,
            ring_end,
            alignment,
        }
    }

    /// Usable ring bytes.
    #[must_use]
    pub const fn ring_len(&self) -> u64 {
        self.ring_end.saturating_sub(self.ring_start)
    }

    /// Bytes read to decode one frame header; also the length of a wrap
    /// marker. A tail shorter than this is an implicit wrap.
    #[must_use]
    pub const fn head_len(&self) -> u64 {
        align_up(FRAME_HEADER_LEN as u64, self.alignment as u64)
    }

    /// Returns whether `offset` is a valid cursor position.
    #[must_use]
    pub const fn contains(&self, offset: u64) -> bool {
        offset >= self.ring_start && offset <= self.ring_end
    }
}

/// An entry that still occupies ring space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveEntry {
    /// Entry sequence.
    pub seq: u64,
    /// Ring offset of the frame.
    pub offset: u64,
    /// Frame length.
    pub len: u64,
}

/// Outcome of [`RingSpace::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The frame goes at `offset`, after the current write position.
    Fits {
        /// Frame offset.
        offset: u64,
    },
    /// The tail is too short; the frame goes at the ring start.
    Wrap {
        /// Where to write a wrap marker, if the tail has room for one.
        marker_offset: Option<u64>,
        /// Frame offset (always the ring start).
        offset: u64,
    },
    /// Not enough reclaimed space; wait for `commit_thru`.
    Stall,
}

/// Tracks the write cursor, live entries, and reclaimable space.
///
/// The trim position is the offset of the oldest live entry, or the write
/// position when nothing is live. An entry leaves the live set only once
/// it is both durable and committed.
#[derive(Debug, Clone)]
pub struct RingSpace {
    geometry: RingGeometry,
    write_pos: u64,
    live: VecDeque<LiveEntry>,
    last_placed: u64,
    durable_seq: u64,
    committed_seq: u64,
}

impl RingSpace {
    /// Creates an empty ring with the write cursor at the ring start.
    #[must_use]
    pub fn new(geometry: RingGeometry) -> Self {
        Self::restore(geometry, geometry.ring_start, VecDeque::new(), 0, 0)
    }

    /// Rebuilds ring state after replay.
    ///
    /// `live` holds every replayed entry in ring order, all of them durable.
    /// Entries at or below `committed_seq` are trimmed immediately.
    #[must_use]
    pub fn restore(
        geometry: RingGeometry,
        write_pos: u64,
        live: VecDeque<LiveEntry>,
        last_seq: u64,
        committed_seq: u64,
    ) -> Self {
        let last_placed = live.back().map_or(last_seq, |e| e.seq.max(last_seq));
        let mut ring = Self {
            geometry,
            write_pos,
            live,
            last_placed,
            durable_seq: last_placed,
            committed_seq,
        };
        ring.trim();
        ring
    }

    /// Ring layout.
    #[must_use]
    pub const fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    /// Next byte the writer will use.
    #[must_use]
    pub const fn write_pos(&self) -> u64 {
        self.write_pos
    }

    /// Offset of the oldest live entry, or the write position when empty.
    #[must_use]
    pub fn trim_offset(&self) -> u64 {
        self.live.front().map_or(self.write_pos, |e| e.offset)
    }

    /// Bytes between the trim and write positions, wrap gap included.
    #[must_use]
    pub fn used(&self) -> u64 {
        let Some(first) = self.live.front() else {
            return 0;
        };
        if self.write_pos > first.offset {
            self.write_pos - first.offset
        } else {
            (self.geometry.ring_end - first.offset) + (self.write_pos - self.geometry.ring_start)
        }
    }

    /// Free bytes that follow the write position without crossing the ring
    /// end or the oldest live entry.
    #[must_use]
    pub fn free_ahead(&self) -> u64 {
        match self.live.front() {
            Some(first) if self.write_pos <= first.offset => first.offset - self.write_pos,
            _ => self.geometry.ring_end - self.write_pos,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn live_entries(&self) -> usize {
        self.live.len()
    }

    /// Highest sequence ever placed.
    #[must_use]
    pub const fn last_placed(&self) -> u64 {
        self.last_placed
    }

    /// Highest durable sequence.
    #[must_use]
    pub const fn durable_seq(&self) -> u64 {
        self.durable_seq
    }

    /// Highest committed sequence.
    #[must_use]
    pub const fn committed_seq(&self) -> u64 {
        self.committed_seq
    }

    /// Returns whether a frame of `len` bytes can ever fit.
    #[must_use]
    pub const fn can_ever_fit(&self, len: u64) -> bool {
        len <= self.geometry.ring_len()
    }

    /// Finds a position for a frame of `len` bytes without claiming it.
    #[must_use]
    pub fn reserve(&self, len: u64) -> Placement {
        let RingGeometry {
            ring_start,
            ring_end,
            ..
        } = self.geometry;
        let tail = ring_end - self.write_pos;

        let wrap = || Placement::Wrap {
            marker_offset: (tail >= self.geometry.head_len()).then_some(self.write_pos),
            offset: ring_start,
        };

        match self.live.front() {
            None => {
                if tail >= len {
                    Placement::Fits {
                        offset: self.write_pos,
                    }
                } else if self.geometry.ring_len() >= len {
                    wrap()
                } else {
                    Placement::Stall
                }
            }
            Some(first) if self.write_pos > first.offset => {
                if tail >= len {
                    Placement::Fits {
                        offset: self.write_pos,
                    }
                } else if first.offset - ring_start >= len {
                    wrap()
                } else {
                    Placement::Stall
                }
            }
            Some(first) => {
                if first.offset - self.write_pos >= len {
                    Placement::Fits {
                        offset: self.write_pos,
                    }
                } else {
                    Placement::Stall
                }
            }
        }
    }

    /// Claims a placement from [`RingSpace::reserve`] for entry `seq`.
    ///
    /// Returns the frame offset, or `None` for [`Placement::Stall`].
    pub fn place(&mut self, placement: Placement, seq: u64, len: u64) -> Option<u64> {
        let offset = match placement {
            Placement::Fits { offset } | Placement::Wrap { offset, .. } => offset,
            Placement::Stall => return None,
        };
        self.write_pos = offset + len;
        self.live.push_back(LiveEntry { seq, offset, len });
        self.last_placed = seq;
        Some(offset)
    }

    /// Records that everything through `seq` is on stable storage.
    ///
    /// Returns whether the trim position moved.
    pub fn mark_durable(&mut self, seq: u64) -> bool {
        if seq <= self.durable_seq {
            return false;
        }
        self.durable_seq = seq;
        self.trim()
    }

    /// Records that the caller applied everything through `seq`.
    ///
    /// Lower or equal values are ignored. Returns whether the trim
    /// position moved.
    pub fn commit_thru(&mut self, seq: u64) -> bool {
        if seq <= self.committed_seq {
            return false;
        }
        self.committed_seq = seq;
        self.trim()
    }

    fn trim(&mut self) -> bool {
        let bound = self.durable_seq.min(self.committed_seq);
        let mut moved = false;
        while self.live.front().is_some_and(|e| e.seq <= bound) {
            self.live.pop_front();
            moved = true;
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn geometry() -> RingGeometry {
        // 1000 ring bytes starting at 512
        RingGeometry::new(512, 1512, 8)
    }

    fn fill(ring: &mut RingSpace, seq: u64, len: u64) -> u64 {
        let placement = ring.reserve(len);
        ring.place(placement, seq, len).unwrap()
    }

    #[test]
    fn empty_ring() {
        let ring = RingSpace::new(geometry());
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.write_pos(), 512);
        assert_eq!(ring.trim_offset(), 512);
        assert_eq!(ring.geometry().head_len(), 32);
    }

    #[test]
    fn sequential_placement() {
        let mut ring = RingSpace::new(geometry());
        assert_eq!(fill(&mut ring, 1, 100), 512);
        assert_eq!(fill(&mut ring, 2, 100), 612);
        assert_eq!(ring.used(), 200);
        assert_eq!(ring.live_entries(), 2);
        assert_eq!(ring.last_placed(), 2);
    }

    #[test]
    fn stalls_when_full() {
        let mut ring = RingSpace::new(geometry());
        fill(&mut ring, 1, 600);
        assert_eq!(ring.reserve(500), Placement::Stall);
        assert!(matches!(ring.reserve(400), Placement::Fits { offset: 1112 }));
    }

    #[test]
    fn trim_requires_durable_and_committed() {
        let mut ring = RingSpace::new(geometry());
        fill(&mut ring, 1, 100);
        fill(&mut ring, 2, 100);

        assert!(!ring.commit_thru(2));
        assert_eq!(ring.used(), 200);

        assert!(ring.mark_durable(1));
        assert_eq!(ring.used(), 100);
        assert_eq!(ring.trim_offset(), 612);

        assert!(ring.mark_durable(2));
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.trim_offset(), 712);
    }

    #[test]
    fn free_ahead_stops_at_ring_end_or_live_entry() {
        let mut ring = RingSpace::new(geometry());
        assert_eq!(ring.free_ahead(), 1000);
        fill(&mut ring, 1, 400);
        fill(&mut ring, 2, 400);
        assert_eq!(ring.free_ahead(), 200);

        ring.mark_durable(2);
        ring.commit_thru(1);
        fill(&mut ring, 3, 300);
        // wrapped: free space ends where entry 2 starts
        assert_eq!(ring.write_pos(), 812);
        assert_eq!(ring.free_ahead(), 100);
    }

    #[test]
    fn commit_thru_is_monotonic() {
        let mut ring = RingSpace::new(geometry());
        fill(&mut ring, 1, 100);
        ring.mark_durable(1);
        assert!(ring.commit_thru(1));
        assert!(!ring.commit_thru(1));
        assert!(!ring.commit_thru(0));
        assert_eq!(ring.committed_seq(), 1);
    }

    #[test]
    fn wraps_with_marker() {
        let mut ring = RingSpace::new(geometry());
        fill(&mut ring, 1, 400);
        fill(&mut ring, 2, 400);
        ring.mark_durable(2);
        ring.commit_thru(1);

        // 200 bytes of tail left, 400 reclaimed at the front
        let placement = ring.reserve(300);
        assert_eq!(
            placement,
            Placement::Wrap {
                marker_offset: Some(1312),
                offset: 512
            }
        );
        ring.place(placement, 3, 300);
        assert_eq!(ring.write_pos(), 812);
        // 400 live + 200 gap + 300 new
        assert_eq!(ring.used(), 900);

        ring.commit_thru(3);
        assert_eq!(ring.used(), 300);
        ring.mark_durable(3);
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn wraps_without_marker_when_tail_is_tiny() {
        let mut ring = RingSpace::new(geometry());
        fill(&mut ring, 1, 984);
        ring.mark_durable(1);
        ring.commit_thru(1);

        assert_eq!(
            ring.reserve(100),
            Placement::Wrap {
                marker_offset: None,
                offset: 512
            }
        );
    }

    #[test]
    fn wrapped_ring_stalls_at_trim() {
        let mut ring = RingSpace::new(geometry());
        fill(&mut ring, 1, 500);
        fill(&mut ring, 2, 500);
        ring.mark_durable(2);
        ring.commit_thru(1);

        fill(&mut ring, 3, 500);
        assert_eq!(ring.used(), 1000);
        assert_eq!(ring.reserve(8), Placement::Stall);
    }

    #[test]
    fn restore_trims_committed_entries() {
        let live: VecDeque<_> = [
            LiveEntry {
                seq: 4,
                offset: 512,
                len: 100,
            },
            LiveEntry {
                seq: 5,
                offset: 612,
                len: 100,
            },
        ]
        .into_iter()
        .collect();
        let ring = RingSpace::restore(geometry(), 712, live, 5, 4);
        assert_eq!(ring.trim_offset(), 612);
        assert_eq!(ring.used(), 100);
        assert_eq!(ring.durable_seq(), 5);
        assert_eq!(ring.last_placed(), 5);
    }

    #[test]
    fn oversized_frame_never_fits() {
        let ring = RingSpace::new(geometry());
        assert!(ring.can_ever_fit(1000));
        assert!(!ring.can_ever_fit(1001));
    }

    proptest! {
        #[test]
        fn used_never_exceeds_ring(lens in prop::collection::vec(1u64..120, 1..200)) {
            let mut ring = RingSpace::new(geometry());
            let mut seq = 0;
            for len in lens {
                let len = align_up(len, 8);
                let placement = ring.reserve(len);
                if placement == Placement::Stall {
                    ring.mark_durable(seq);
                    ring.commit_thru(seq.saturating_sub(2));
                    continue;
                }
                seq += 1;
                let offset = ring.place(placement, seq, len).unwrap();
                prop_assert!(offset >= 512);
                prop_assert!(offset + len <= 1512);
                prop_assert!(ring.used() <= ring.geometry().ring_len());
            }
        }

        #[test]
        fn live_frames_never_overlap(lens in prop::collection::vec(8u64..200, 1..300)) {
            let mut ring = RingSpace::new(geometry());
            let mut seq = 0;
            for len in lens {
                let len = align_up(len, 8);
                let placement = ring.reserve(len);
                if placement == Placement::Stall {
                    ring.mark_durable(seq);
                    ring.commit_thru(seq);
                    continue;
                }
                seq += 1;
                ring.place(placement, seq, len);
                let mut spans: Vec<_> = ring.live.iter().map(|e| (e.offset, e.offset + e.len)).collect();
                spans.sort_unstable();
                for pair in spans.windows(2) {
                    prop_assert!(pair[0].1 <= pair[1].0);
                }
            }
        }
    }
}
