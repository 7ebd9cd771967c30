//! MurmurHash3, x64 128-bit variant.

const C1: u64 = 0x87c37b91114253d5;
const C2: u64 = 0x4cf5ad432745937f;

#[inline(always)]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

#[inline(always)]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline(always)]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Hash `data` with `seed`, returning `(h1, h2)`.
pub fn murmurhash3_x64_128(data: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let (lo, hi) = block.split_at(8);
        let k1 = u64::from_le_bytes(lo.try_into().unwrap_or([0; 8]));
        let k2 = u64::from_le_bytes(hi.try_into().unwrap_or([0; 8]));

        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(27).wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dce729);

        h2 ^= mix_k2(k2);
        h2 = h2.rotate_left(31).wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x38495ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        let k2 = tail[8..]
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc ^ ((*b as u64) << (i * 8)));
        h2 ^= mix_k2(k2);
    }
    if !tail.is_empty() {
        let k1 = tail[..tail.len().min(8)]
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc ^ ((*b as u64) << (i * 8)));
        h1 ^= mix_k1(k1);
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// The 128-bit hash viewed as four 32-bit words, low word of `h1` first.
pub fn murmurhash3_x64_128_words(data: &[u8], seed: u64) -> [u32; 4] {
    let (h1, h2) = murmurhash3_x64_128(data, seed);
    [h1 as u32, (h1 >> 32) as u32, h2 as u32, (h2 >> 32) as u32]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(murmurhash3_x64_128(b"", 0), (0, 0));
    }

    #[test]
    fn test_known_vector() {
        let (h1, h2) = murmurhash3_x64_128(b"hello", 0);
        assert_eq!(h1, 0xcbd8a7b341bd9b02);
        assert_eq!(h2, 0x5b1e906a48ae1d19);
    }

    #[test]
    fn test_seed_changes_hash() {
        assert_ne!(
            murmurhash3_x64_128(b"data0.txt", 57),
            murmurhash3_x64_128(b"data0.txt", 57 + 104677)
        );
    }

    #[test]
    fn test_every_tail_length() {
        let data: Vec<u8> = (0u8..48).collect();
        let mut seen = std::collections::HashSet::new();
        for len in 0..=data.len() {
            assert!(seen.insert(murmurhash3_x64_128(&data[..len], 1)));
        }
    }

    #[test]
    fn test_words_layout() {
        let (h1, h2) = murmurhash3_x64_128(b"abc", 3);
        let w = murmurhash3_x64_128_words(b"abc", 3);
        assert_eq!(((w[1] as u64) << 32) | w[0] as u64, h1);
        assert_eq!(((w[3] as u64) << 32) | w[2] as u64, h2);
    }
}
