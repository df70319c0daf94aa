use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-local, in-memory bloom membership filter gating negative-cache
/// sentinels. Default sizing is 2^20 bits with 3 independent hashes, per the
/// query cache's negative-result contract.
///
/// Backed by `AtomicU64` words so `might_contain`/`insert` need no external
/// locking; false positives are expected and acceptable (they only cause an
/// extra round-trip to the store), false negatives are not possible.
pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new(num_bits: u64, num_hashes: u32) -> Self {
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            num_bits,
            num_hashes,
        }
    }

    /// Default sizing per the negative cache's membership filter: 2^20
    /// bits, 3 hashes.
    pub fn with_defaults() -> Self {
        Self::new(1 << 20, 3)
    }

    pub fn insert(&self, key: &str) {
        for index in self.bit_indices(key) {
            let word = index / 64;
            let bit = index % 64;
            self.bits[word as usize].fetch_or(1u64 << bit, Ordering::Relaxed);
        }
    }

    pub fn might_contain(&self, key: &str) -> bool {
        self.bit_indices(key)
            .all(|index| {
                let word = index / 64;
                let bit = index % 64;
                self.bits[word as usize].load(Ordering::Relaxed) & (1u64 << bit) != 0
            })
    }

    fn bit_indices(&self, key: &str) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = double_hash(key);
        (0..self.num_hashes).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            combined % self.num_bits
        })
    }
}

/// Kirsch-Mitzenmacher double hashing: derive `num_hashes` independent hash
/// values from two base hashes instead of hashing `key` once per slot.
fn double_hash(key: &str) -> (u64, u64) {
    let mut h1 = DefaultHasher::new();
    key.hash(&mut h1);
    let a = h1.finish();

    let mut h2 = DefaultHasher::new();
    (key, 0x9e3779b97f4a7c15u64).hash(&mut h2);
    let b = h2.finish();

    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_found() {
        let filter = BloomFilter::with_defaults();
        filter.insert("events:contract:0xAA:from:1:to:100");
        assert!(filter.might_contain("events:contract:0xAA:from:1:to:100"));
    }

    #[test]
    fn absent_keys_are_usually_not_found() {
        let filter = BloomFilter::new(1 << 16, 3);
        for i in 0..100 {
            filter.insert(&format!("key-{i}"));
        }
        // Not a guarantee (false positives are allowed), but this specific
        // unrelated key should not collide at this fill factor.
        assert!(!filter.might_contain("definitely-not-inserted"));
    }
}
