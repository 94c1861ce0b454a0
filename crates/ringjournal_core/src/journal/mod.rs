//! The ring-buffer journal.
//!
//! The journal is a fixed-size file: one header block followed by a ring.
//! Entries are appended at the write cursor and reclaimed from the trim
//! cursor once the caller reports them applied with
//! [`Journal::committed_thru`].
//!
//! ## Header Format
//!
//! ```text
//! | magic "RJHD" (4) | version (4) | identity (16) | capacity (8)
//! | block_size (4) | frame_alignment (4) | flags (4) | reserved (4)
//! | ring_start (8) | start (8) | committed_seq (8) | live_bytes (8)
//! | last_seq (8) | crc32 (4) |
//! ```
//!
//! The header is padded to `block_size` and lives at offset 0. `start` is
//! the persisted trim position, where replay begins. The `CLEAN` flag and
//! `live_bytes` are set by a clean close and cleared by the first header
//! write after the journal becomes writable again.
//!
//! ## Frame Format
//!
//! ```text
//! | magic "RJFR" (4) | kind (1) | reserved (3) | flags (4) | payload_len (4)
//! | seq (8) | frame_len (4) | crc32 (4) | payload (N) | zero padding |
//! ```
//!
//! `frame_len` is the header plus payload rounded up to the frame
//! alignment (8 bytes, or the block size under direct I/O). The CRC32 is
//! seeded with the journal identity and covers the first 28 header bytes
//! and the payload, so frames left behind by another journal never
//! validate. A frame of kind `WRAP` tells the reader to continue at the
//! ring start; a tail too short to hold a frame header is an implicit wrap.
//!
//! ## Recovery Policy
//!
//! Replay starts at `start` and stops, without error, at the first frame
//! that does not validate, at a frame whose sequence does not exceed its
//! predecessor (data from an earlier lap), once the live bytes recorded by
//! a clean close are consumed, or once the whole ring has been covered.
//!
//! ## Invariants
//!
//! - Entries are never modified after write
//! - Completions are dispatched strictly in sequence order
//! - The trim cursor never passes an entry that is not both durable and
//!   committed
//! - The header's `start` is persisted before any write lands in space it
//!   reclaims
//! - A write failure moves the instance to the failed state for good

mod frame;
mod header;
mod replay;
mod ring;
mod store;
mod writer;

pub use frame::{
    align_up, decode_frame_header, encode_entry, encode_wrap, framed_len, verify_frame,
    FrameHeader, FrameKind, FRAME_HEADER_LEN, FRAME_MAGIC,
};
pub use header::{JournalHeader, HEADER_FLAG_CLEAN, HEADER_LEN, HEADER_MAGIC, JOURNAL_VERSION};
pub use replay::{RingScanner, ScanEnd, ScannedEntry};
pub use ring::{LiveEntry, Placement, RingGeometry, RingSpace};
pub use store::{BackendOpener, Journal};
