//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entry streams and configurations
//! that respect the journal's invariants.

use ringjournal_core::{JournalConfig, MIN_BLOCK_SIZE};
use proptest::prelude::*;

/// Deterministic payload for entry `seq`, so replayed bytes can be checked
/// without keeping the originals.
pub fn pattern_payload(seq: u64, len: usize) -> Vec<u8> {
    let seed = seq.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..len)
        .map(|i| (seed.rotate_left((i % 64) as u32) as u8) ^ (i as u8))
        .collect()
}

/// Strategy for entry payloads (arbitrary bytes).
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for a stream of `(flags, payload)` entries.
pub fn entry_stream_strategy(
    max_entries: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<(u32, Vec<u8>)>> {
    prop::collection::vec((any::<u32>(), payload_strategy(max_len)), 1..=max_entries)
}

/// Strategy for strictly increasing sequence numbers with gaps.
pub fn sequence_strategy(max_entries: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..5, 1..=max_entries).prop_map(|steps| {
        steps
            .into_iter()
            .scan(0u64, |seq, step| {
                *seq += step;
                Some(*seq)
            })
            .collect()
    })
}

/// Strategy for valid block sizes.
pub fn block_size_strategy() -> impl Strategy<Value = usize> {
    (0u32..=4).prop_map(|shift| MIN_BLOCK_SIZE << shift)
}

/// Strategy for valid in-memory configurations.
///
/// Capacities are a whole number of blocks so both I/O modes validate.
pub fn config_strategy() -> impl Strategy<Value = JournalConfig> {
    (block_size_strategy(), 8u64..64, any::<bool>()).prop_map(|(block_size, blocks, directio)| {
        JournalConfig::new("memory")
            .block_size(block_size)
            .capacity_bytes(block_size as u64 * blocks)
            .directio(directio)
            .identity(crate::fixtures::TEST_IDENTITY)
    })
}
