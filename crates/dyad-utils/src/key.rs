//! Sharded metadata keys.
//!
//! A relative path is spread over `depth` levels of at most `bins` buckets
//! each, so no single level of the store ends up holding every file. The
//! full path is kept as the last component, which makes the mapping
//! injective: two different paths can share buckets but never a key.

use std::fmt::Write;

use crate::murmur3::murmurhash3_x64_128_words;

/// Paths shorter than this are padded before hashing.
pub const KEY_HASH_WIDTH: usize = 128;

const KEY_PAD_BYTE: u8 = b'@';
const KEY_BASE_SEED: u64 = 57;
const KEY_LEVEL_SEEDS: [u64; 10] = [
    104677, 104681, 104683, 104693, 104701, 104707, 104711, 104717, 104723, 104729,
];

/// Default number of levels.
pub const DEFAULT_KEY_DEPTH: u32 = 3;
/// Default number of buckets per level.
pub const DEFAULT_KEY_BINS: u32 = 1024;

/// Bucket index of `path` at every level, outermost first.
pub fn key_buckets(path: &str, depth: u32, bins: u32) -> Vec<u32> {
    let bins = bins.max(1);
    let mut input = path.as_bytes().to_vec();
    if input.len() < KEY_HASH_WIDTH {
        input.resize(KEY_HASH_WIDTH, KEY_PAD_BYTE);
    }

    let mut seed = KEY_BASE_SEED;
    (0..depth as usize)
        .map(|level| {
            seed += KEY_LEVEL_SEEDS[level % KEY_LEVEL_SEEDS.len()];
            let [a, b, c, d] = murmurhash3_x64_128_words(&input, seed);
            (a ^ b ^ c ^ d) % bins
        })
        .collect()
}

/// Derive the store key for `path`, e.g. `"1f.3a0.7.data0.txt"` for depth 3.
pub fn derive_key(path: &str, depth: u32, bins: u32) -> String {
    let mut key = String::with_capacity(path.len() + depth as usize * 4);
    for bin in key_buckets(path, depth, bins) {
        let _ = write!(key, "{:x}.", bin);
    }
    key.push_str(path);
    key
}
