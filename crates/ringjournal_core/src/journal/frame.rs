//! Frame encoding and validation.

use crate::error::{JournalError, JournalResult};
use crc32fast::Hasher;
use uuid::Uuid;

/// Magic bytes identifying a ring frame.
pub const FRAME_MAGIC: [u8; 4] = *b"RJFR";

/// Size of the fixed frame header.
/// magic (4) + kind (1) + reserved (3) + flags (4) + payload_len (4)
/// + seq (8) + frame_len (4) + crc (4) = 32 bytes
pub const FRAME_HEADER_LEN: usize = 32;

/// Bytes of the frame header covered by the checksum.
const CRC_COVERED: usize = 28;

/// Type of ring frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A caller entry.
    Entry = 1,
    /// The writer jumped from the tail back to the ring start.
    Wrap = 2,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Entry),
            2 => Some(Self::Wrap),
            _ => None,
        }
    }

    /// Converts the frame kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Decoded fixed part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame kind.
    pub kind: FrameKind,
    /// Caller flags (zero for wrap markers).
    pub flags: u32,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// Entry sequence; for a wrap marker, the sequence of the entry before it.
    pub seq: u64,
    /// Total frame length including padding.
    pub frame_len: u32,
    /// Stored checksum.
    pub crc: u32,
}

/// Rounds `value` up to a multiple of `alignment`.
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Ring bytes taken by an entry with a payload of `payload_len` bytes.
#[must_use]
pub const fn framed_len(payload_len: usize, alignment: usize) -> u64 {
    align_up((FRAME_HEADER_LEN + payload_len) as u64, alignment as u64)
}

fn checksum(identity: &Uuid, covered_header: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(identity.as_bytes());
    hasher.update(covered_header);
    hasher.update(payload);
    hasher.finalize()
}

fn encode(
    out: &mut Vec<u8>,
    identity: &Uuid,
    kind: FrameKind,
    flags: u32,
    seq: u64,
    payload: &[u8],
    frame_len: u64,
) -> JournalResult<()> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| JournalError::invalid_state("frame payload too large"))?;
    let frame_len_u32 = u32::try_from(frame_len)
        .map_err(|_| JournalError::invalid_state("frame too large"))?;

    let start = out.len();
    out.extend_from_slice(&FRAME_MAGIC);
    out.push(kind.as_byte());
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&frame_len_u32.to_le_bytes());

    let crc = checksum(identity, &out[start..start + CRC_COVERED], payload);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(payload);

    let padded_end = start + frame_len as usize;
    out.resize(padded_end, 0);
    Ok(())
}

/// Appends an entry frame to `out` and returns its length.
///
/// # Errors
///
/// Returns an error if the payload or frame does not fit the 32-bit
/// length fields.
pub fn encode_entry(
    out: &mut Vec<u8>,
    identity: &Uuid,
    seq: u64,
    flags: u32,
    payload: &[u8],
    alignment: usize,
) -> JournalResult<u64> {
    let frame_len = framed_len(payload.len(), alignment);
    encode(out, identity, FrameKind::Entry, flags, seq, payload, frame_len)?;
    Ok(frame_len)
}

/// Appends a wrap marker to `out` and returns its length.
///
/// # Errors
///
/// Never fails for valid alignments; the signature matches [`encode_entry`].
pub fn encode_wrap(
    out: &mut Vec<u8>,
    identity: &Uuid,
    last_seq: u64,
    alignment: usize,
) -> JournalResult<u64> {
    let frame_len = framed_len(0, alignment);
    encode(out, identity, FrameKind::Wrap, 0, last_seq, &[], frame_len)?;
    Ok(frame_len)
}

/// Parses the fixed frame header at ring offset `offset`.
///
/// # Errors
///
/// Returns [`JournalError::CorruptEntry`] for a short buffer, bad magic,
/// unknown kind, or a frame length that disagrees with the payload length
/// and alignment.
pub fn decode_frame_header(bytes: &[u8], offset: u64, alignment: usize) -> JournalResult<FrameHeader> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(JournalError::corrupt_entry(offset, "short frame header"));
    }
    if bytes[0..4] != FRAME_MAGIC {
        return Err(JournalError::corrupt_entry(offset, "invalid magic"));
    }
    let kind = FrameKind::from_byte(bytes[4]).ok_or_else(|| {
        JournalError::corrupt_entry(offset, format!("unknown frame kind {}", bytes[4]))
    })?;

    let flags = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(&bytes[16..24]);
    let seq = u64::from_le_bytes(seq_bytes);
    let frame_len = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
    let crc = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);

    if kind == FrameKind::Wrap && payload_len != 0 {
        return Err(JournalError::corrupt_entry(offset, "wrap marker with payload"));
    }
    let expected = framed_len(payload_len as usize, alignment);
    if u64::from(frame_len) != expected {
        return Err(JournalError::corrupt_entry(
            offset,
            format!("frame length {frame_len} does not match expected {expected}"),
        ));
    }

    Ok(FrameHeader {
        kind,
        flags,
        payload_len,
        seq,
        frame_len,
        crc,
    })
}

/// Verifies a frame checksum.
///
/// `header_bytes` must start with the raw frame header.
///
/// # Errors
///
/// Returns [`JournalError::CorruptEntry`] on mismatch.
pub fn verify_frame(
    identity: &Uuid,
    header: &FrameHeader,
    header_bytes: &[u8],
    payload: &[u8],
    offset: u64,
) -> JournalResult<()> {
    if header_bytes.len() < FRAME_HEADER_LEN {
        return Err(JournalError::corrupt_entry(offset, "short frame header"));
    }
    let computed = checksum(identity, &header_bytes[..CRC_COVERED], payload);
    if computed != header.crc {
        return Err(JournalError::corrupt_entry(
            offset,
            format!(
                "checksum mismatch: expected {:08x}, got {computed:08x}",
                header.crc
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Uuid {
        Uuid::from_bytes([7; 16])
    }

    #[test]
    fn frame_kind_roundtrip() {
        for kind in [FrameKind::Entry, FrameKind::Wrap] {
            assert_eq!(FrameKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(FrameKind::from_byte(0), None);
    }

    #[test]
    fn align_up_values() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(32, 8), 32);
        assert_eq!(align_up(33, 4096), 4096);
    }

    #[test]
    fn framed_len_pads_to_alignment() {
        assert_eq!(framed_len(5, 8), 40);
        assert_eq!(framed_len(0, 8), 32);
        assert_eq!(framed_len(5, 4096), 4096);
        assert_eq!(framed_len(4096, 4096), 8192);
    }

    #[test]
    fn entry_frame_decodes_and_verifies() {
        let mut buf = Vec::new();
        let len = encode_entry(&mut buf, &id(), 9, 0xAB, b"small", 8).unwrap();
        assert_eq!(len, 40);
        assert_eq!(buf.len(), 40);

        let header = decode_frame_header(&buf, 0, 8).unwrap();
        assert_eq!(header.kind, FrameKind::Entry);
        assert_eq!(header.seq, 9);
        assert_eq!(header.flags, 0xAB);
        assert_eq!(header.payload_len, 5);
        let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 5];
        assert_eq!(payload, b"small");
        verify_frame(&id(), &header, &buf, payload, 0).unwrap();
    }

    #[test]
    fn wrap_marker_has_no_payload() {
        let mut buf = Vec::new();
        let len = encode_wrap(&mut buf, &id(), 41, 512).unwrap();
        assert_eq!(len, 512);

        let header = decode_frame_header(&buf, 0, 512).unwrap();
        assert_eq!(header.kind, FrameKind::Wrap);
        assert_eq!(header.seq, 41);
        verify_frame(&id(), &header, &buf, &[], 0).unwrap();
    }

    #[test]
    fn flipped_payload_bit_fails_checksum() {
        let mut buf = Vec::new();
        encode_entry(&mut buf, &id(), 1, 0, b"payload", 8).unwrap();
        buf[FRAME_HEADER_LEN] ^= 0x01;

        let header = decode_frame_header(&buf, 0, 8).unwrap();
        let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 7];
        assert!(matches!(
            verify_frame(&id(), &header, &buf, payload, 0),
            Err(JournalError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn other_identity_fails_checksum() {
        let mut buf = Vec::new();
        encode_entry(&mut buf, &id(), 1, 0, b"payload", 8).unwrap();
        let header = decode_frame_header(&buf, 0, 8).unwrap();
        let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 7];

        let other = Uuid::from_bytes([8; 16]);
        assert!(verify_frame(&other, &header, &buf, payload, 0).is_err());
    }

    #[test]
    fn zeroed_bytes_are_not_a_frame() {
        let buf = [0u8; FRAME_HEADER_LEN];
        assert!(decode_frame_header(&buf, 64, 8).is_err());
    }

    #[test]
    fn mismatched_frame_len_rejected() {
        let mut buf = Vec::new();
        encode_entry(&mut buf, &id(), 1, 0, b"abc", 8).unwrap();
        assert!(decode_frame_header(&buf, 0, 4096).is_err());
    }
}
