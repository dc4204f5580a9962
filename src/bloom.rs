//! Probabilistic voter fingerprints
//!
//! Each comment stores an approximate set of the addresses that have voted on
//! it, so a voter can be refused a second vote without persisting the raw
//! addresses themselves. The fingerprint is a small Bloom filter whose byte
//! image is written straight into the `voters` column.

use sha2::{Digest, Sha256};

/// Size of the bit array in bytes
const ARRAY_BYTES: usize = 256;

/// Number of bits in the array (must stay a power of two)
const ARRAY_BITS: usize = ARRAY_BYTES * 8;

/// Number of probe positions derived per key
const PROBES: u32 = 11;

/// Bits consumed from the digest per probe (log2 of `ARRAY_BITS`)
const PROBE_SHIFT: u32 = 11;

/// Approximate-membership fingerprint for comment voters.
///
/// A fixed 256-byte bit array with 11 probe positions per key, derived from
/// the SHA-256 digest of the key. The derivation is fully deterministic, so
/// the same sequence of keys always produces the same byte image regardless
/// of process or platform. That property is what makes rebuilding every
/// stored fingerprint from a fixed seed a reproducible migration.
///
/// False positives are possible (a non-voter may be refused), false negatives
/// are not. With 256 bytes and 11 probes the false-positive rate stays below
/// 1% up to roughly 150 entries.
#[derive(Debug, Clone)]
pub struct Bloomfilter {
    array: [u8; ARRAY_BYTES],
    elements: usize,
}

impl Default for Bloomfilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Bloomfilter {
    /// Create an empty fingerprint
    pub fn new() -> Self {
        Self {
            array: [0u8; ARRAY_BYTES],
            elements: 0,
        }
    }

    /// Create a fingerprint pre-seeded with the given keys
    pub fn seeded<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bf = Self::new();
        for key in keys {
            bf.add(key);
        }
        bf
    }

    /// Restore a fingerprint from a stored byte image
    ///
    /// Returns `None` if the image has the wrong length. The element count is
    /// not stored alongside the array; callers that need it must track it
    /// separately.
    pub fn from_bytes(bytes: &[u8], elements: usize) -> Option<Self> {
        let array: [u8; ARRAY_BYTES] = bytes.try_into().ok()?;
        Some(Self { array, elements })
    }

    /// Add a key to the fingerprint
    pub fn add(&mut self, key: &str) {
        for bit in Self::probes(key) {
            self.array[bit / 8] |= 1 << (bit % 8);
        }
        self.elements += 1;
    }

    /// Check whether a key has (probably) been added
    pub fn contains(&self, key: &str) -> bool {
        Self::probes(key).all(|bit| self.array[bit / 8] & (1 << (bit % 8)) != 0)
    }

    /// Number of keys added so far
    pub fn len(&self) -> usize {
        self.elements
    }

    /// True if no key has been added
    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// The raw byte image, as persisted in the `voters` column
    pub fn as_bytes(&self) -> &[u8] {
        &self.array
    }

    /// Derive the probe positions for a key.
    ///
    /// The low 121 bits of the SHA-256 digest are consumed 11 bits at a time,
    /// each slice indexing one bit in the array.
    fn probes(key: &str) -> impl Iterator<Item = usize> {
        let digest = Sha256::digest(key.as_bytes());
        let mut tail = [0u8; 16];
        tail.copy_from_slice(&digest[16..]);
        let mut h = u128::from_be_bytes(tail);
        (0..PROBES).map(move |_| {
            let bit = (h & (ARRAY_BITS as u128 - 1)) as usize;
            h >>= PROBE_SHIFT;
            bit
        })
    }
}
