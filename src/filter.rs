//! Bloom filters for negative lookups.
//!
//! Two variants live here. [`BloomFilter`] is sized from an expected item
//! count and a target false-positive rate and probes with classic double
//! hashing. [`TableFilter`] is the lightweight fixed-size filter attached to
//! each SSTable file; it trades precision for a cheap two-probe scheme.
//!
//! Both support `add` and `might_contain` only. False positives are
//! acceptable; false negatives are not.

use crate::error::Result;
use crate::errinput;

/// Bit count of every per-table filter.
const TABLE_FILTER_BITS: u64 = 8 * 1024;

/// Accumulates a 31-multiplier hash over the string's UTF-8 bytes.
fn hash31(key: &str) -> u64 {
    key.bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64))
}

/// Accumulates a 17-multiplier hash over the string's UTF-8 bytes.
fn hash17(key: &str) -> u64 {
    key.bytes()
        .fold(0u64, |h, b| h.wrapping_mul(17).wrapping_add(b as u64))
}

/// A word-packed bit set.
#[derive(Debug, Clone)]
struct BitSet {
    words: Vec<u64>,
    nbits: u64,
}

impl BitSet {
    fn new(nbits: u64) -> Self {
        let words = vec![0u64; (nbits as usize).div_ceil(64)];
        Self { words, nbits }
    }

    fn set(&mut self, bit: u64) {
        let bit = bit % self.nbits;
        self.words[(bit / 64) as usize] |= 1 << (bit % 64);
    }

    fn get(&self, bit: u64) -> bool {
        let bit = bit % self.nbits;
        self.words[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    }

    fn clear(&mut self) {
        self.words.fill(0);
    }
}

/// A Bloom filter sized for an expected item count and target false-positive
/// rate.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: BitSet,
    hashes: u32,
}

impl BloomFilter {
    /// Creates a filter for `expected_items` entries at roughly `fp_rate`
    /// false positives. The bit count is `ceil(-n*ln(p) / ln(2)^2)` and the
    /// probe count `round((m/n)*ln(2))`, floored at one probe.
    pub fn new(expected_items: usize, fp_rate: f64) -> Result<Self> {
        if expected_items == 0 {
            return errinput!("expected_items must be > 0");
        }
        if fp_rate <= 0.0 || fp_rate >= 1.0 {
            return errinput!("fp_rate must be between 0 and 1, got {fp_rate}");
        }

        let n = expected_items as f64;
        let nbits = (-(n * fp_rate.ln()) / (2f64.ln() * 2f64.ln())).ceil() as u64;
        let nbits = nbits.max(1);
        let hashes = ((nbits as f64 / n) * 2f64.ln()).round().max(1.0) as u32;

        Ok(Self {
            bits: BitSet::new(nbits),
            hashes,
        })
    }

    /// Adds a key to the filter.
    pub fn add(&mut self, key: &str) {
        let (h1, h2) = (hash31(key), hash17(key));
        for i in 0..self.hashes {
            self.bits.set(h1.wrapping_add((i as u64).wrapping_mul(h2)));
        }
    }

    /// Returns true if the key may have been added. Never returns false for
    /// a key that was added.
    pub fn might_contain(&self, key: &str) -> bool {
        let (h1, h2) = (hash31(key), hash17(key));
        (0..self.hashes).all(|i| self.bits.get(h1.wrapping_add((i as u64).wrapping_mul(h2))))
    }

    /// Resets the filter to empty.
    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

/// The fixed-size filter attached to each SSTable file. Two probes: the
/// string hash and its 16-bit rotation.
#[derive(Debug, Clone)]
pub struct TableFilter {
    bits: BitSet,
}

impl TableFilter {
    pub fn new() -> Self {
        Self {
            bits: BitSet::new(TABLE_FILTER_BITS),
        }
    }

    pub fn add(&mut self, key: &str) {
        let h1 = hash31(key);
        self.bits.set(h1);
        self.bits.set(h1.rotate_left(16));
    }

    pub fn might_contain(&self, key: &str) -> bool {
        let h1 = hash31(key);
        self.bits.get(h1) && self.bits.get(h1.rotate_left(16))
    }
}

impl Default for TableFilter {
    fn default() -> Self {
        Self::new()
    }
}
