//! Key and value abstractions for the hash index.
//!
//! Keys and values are stored inline in bucket pages, so both must serialize
//! to a fixed number of bytes. Comparison and hashing are pluggable the same
//! way: the index is generic over a comparator and a hasher so callers can
//! supply their own semantics (tests use an identity hasher to steer keys
//! into chosen buckets).

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use buffer_pool_manager::api::PageId;

/// A type that serializes to a fixed-width byte representation.
pub trait Storable: Clone {
    /// Serialized size in bytes.
    const STORED_SIZE: usize;

    /// Writes the value into `buf`, which is exactly `STORED_SIZE` bytes.
    fn store(&self, buf: &mut [u8]);

    /// Reads a value back from `buf`.
    fn load(buf: &[u8]) -> Self;
}

impl Storable for u32 {
    const STORED_SIZE: usize = 4;

    fn store(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        u32::from_le_bytes(buf[0..4].try_into().unwrap())
    }
}

impl Storable for u64 {
    const STORED_SIZE: usize = 8;

    fn store(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf[0..8].try_into().unwrap())
    }
}

/// A fixed-width byte-string key. The usual instantiations are 4, 8, 16, 32
/// and 64 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self { data }
    }

    /// Builds a key from an integer, little-endian, zero padded. Handy for
    /// tests and for integer-keyed indexes.
    pub fn from_integer(value: u64) -> Self {
        let mut data = [0u8; N];
        let bytes = value.to_le_bytes();
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Storable for GenericKey<N> {
    const STORED_SIZE: usize = N;

    fn store(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data);
    }

    fn load(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[0..N]);
        Self { data }
    }
}

/// Identifies a tuple by the page holding it and its slot within that page.
/// The usual value type of an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl Storable for RecordId {
    const STORED_SIZE: usize = 8;

    fn store(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::from_le_bytes(buf[0..4].try_into().unwrap()),
            slot: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// Strict weak ordering over keys, with equality derived from it.
pub trait KeyComparator<K>: Clone {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;

    fn is_equal(&self, lhs: &K, rhs: &K) -> bool {
        self.compare(lhs, rhs) == Ordering::Equal
    }
}

/// Comparator that defers to the key's `Ord` implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Produces the 32-bit hash that drives header and directory routing. Must
/// be deterministic within a run; stability across runs is not required.
pub trait KeyHasher<K>: Clone {
    fn hash_key(&self, key: &K) -> u32;
}

/// Hashes through `std::hash` and keeps the low 32 bits of the 64-bit value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}
