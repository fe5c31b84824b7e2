//! Bucket page of the extendible hash table.
//!
//! Memory layout:
//! - Bytes 0-3: size (u32, little-endian), number of live entries
//! - Bytes 4-7: max_size (u32, little-endian), capacity chosen at init
//! - Bytes 8+: entries, each a key followed by a value at their fixed widths
//!
//! Entries are unordered; lookups are linear scans with the caller-supplied
//! comparator.

use std::marker::PhantomData;

use buffer_pool_manager::api::PAGE_SIZE;

use crate::key::{KeyComparator, Storable};

const SIZE_OFFSET: usize = 0;
const MAX_SIZE_OFFSET: usize = 4;
const ENTRIES_OFFSET: usize = 8;

/// The largest entry count a bucket page can hold for the given key and
/// value widths. The default bucket size when none is configured.
pub fn bucket_array_capacity<K: Storable, V: Storable>() -> u32 {
    ((PAGE_SIZE - ENTRIES_OFFSET) / (K::STORED_SIZE + V::STORED_SIZE)) as u32
}

/// A typed view over a bucket page's bytes.
pub struct BucketPage<K, V, B> {
    data: B,
    _marker: PhantomData<(K, V)>,
}

impl<K: Storable, V: Storable, B: AsRef<[u8]>> BucketPage<K, V, B> {
    pub fn new(data: B) -> Self {
        assert!(data.as_ref().len() >= PAGE_SIZE, "buffer too small for a bucket page");
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> u32 {
        u32::from_le_bytes(
            self.data.as_ref()[SIZE_OFFSET..SIZE_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn max_size(&self) -> u32 {
        u32::from_le_bytes(
            self.data.as_ref()[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() == self.max_size()
    }

    pub fn key_at(&self, idx: u32) -> K {
        assert!(idx < self.size(), "bucket entry index out of range");
        K::load(&self.data.as_ref()[self.key_offset(idx)..])
    }

    pub fn value_at(&self, idx: u32) -> V {
        assert!(idx < self.size(), "bucket entry index out of range");
        V::load(&self.data.as_ref()[self.value_offset(idx)..])
    }

    pub fn entry_at(&self, idx: u32) -> (K, V) {
        (self.key_at(idx), self.value_at(idx))
    }

    /// Linear scan for `key`; returns its value if present.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Option<V> {
        (0..self.size())
            .find(|&idx| cmp.is_equal(&self.key_at(idx), key))
            .map(|idx| self.value_at(idx))
    }

    fn entry_size() -> usize {
        K::STORED_SIZE + V::STORED_SIZE
    }

    fn key_offset(&self, idx: u32) -> usize {
        ENTRIES_OFFSET + idx as usize * Self::entry_size()
    }

    fn value_offset(&self, idx: u32) -> usize {
        self.key_offset(idx) + K::STORED_SIZE
    }
}

impl<K: Storable, V: Storable, B: AsRef<[u8]> + AsMut<[u8]>> BucketPage<K, V, B> {
    /// Initializes an empty bucket with the given capacity.
    pub fn init(&mut self, max_size: u32) {
        assert!(max_size > 0, "bucket capacity must be positive");
        assert!(
            max_size <= bucket_array_capacity::<K, V>(),
            "bucket capacity {max_size} exceeds page capacity"
        );
        self.set_size(0);
        self.data.as_mut()[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]
            .copy_from_slice(&max_size.to_le_bytes());
    }

    /// Appends an entry. Fails on a full bucket or a duplicate key.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        if self.is_full() || self.lookup(key, cmp).is_some() {
            return false;
        }
        let idx = self.size();
        let key_offset = self.key_offset(idx);
        let value_offset = self.value_offset(idx);
        key.store(&mut self.data.as_mut()[key_offset..key_offset + K::STORED_SIZE]);
        value.store(&mut self.data.as_mut()[value_offset..value_offset + V::STORED_SIZE]);
        self.set_size(idx + 1);
        true
    }

    /// Removes `key` if present, compacting the entry array.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, cmp: &C) -> bool {
        let Some(idx) = (0..self.size()).find(|&idx| cmp.is_equal(&self.key_at(idx), key)) else {
            return false;
        };
        self.remove_at(idx);
        true
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.set_size(0);
    }

    fn remove_at(&mut self, idx: u32) {
        let size = self.size();
        let entry_size = Self::entry_size();
        let start = self.key_offset(idx);
        let end = self.key_offset(size - 1) + entry_size;
        self.data.as_mut().copy_within(start + entry_size..end, start);
        self.set_size(size - 1);
    }

    fn set_size(&mut self, size: u32) {
        self.data.as_mut()[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{GenericKey, OrdComparator, RecordId};

    type Key = GenericKey<8>;

    fn blank_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut buf = blank_page();
        let mut bucket = BucketPage::<Key, RecordId, _>::new(buf.as_mut_slice());
        bucket.init(4);
        let cmp = OrdComparator;

        for i in 0..4u64 {
            assert!(bucket.insert(
                &Key::from_integer(i),
                &RecordId::new(i as u32, 0),
                &cmp
            ));
        }
        assert!(bucket.is_full());
        assert!(!bucket.insert(&Key::from_integer(9), &RecordId::new(9, 0), &cmp));

        for i in 0..4u64 {
            assert_eq!(
                bucket.lookup(&Key::from_integer(i), &cmp),
                Some(RecordId::new(i as u32, 0))
            );
        }
        assert_eq!(bucket.lookup(&Key::from_integer(9), &cmp), None);
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut buf = blank_page();
        let mut bucket = BucketPage::<Key, RecordId, _>::new(buf.as_mut_slice());
        bucket.init(4);
        let cmp = OrdComparator;

        assert!(bucket.insert(&Key::from_integer(1), &RecordId::new(1, 0), &cmp));
        assert!(!bucket.insert(&Key::from_integer(1), &RecordId::new(2, 0), &cmp));
        assert_eq!(bucket.size(), 1);
    }

    #[test]
    fn test_remove_compacts_entries() {
        let mut buf = blank_page();
        let mut bucket = BucketPage::<Key, RecordId, _>::new(buf.as_mut_slice());
        bucket.init(4);
        let cmp = OrdComparator;

        for i in 0..3u64 {
            bucket.insert(&Key::from_integer(i), &RecordId::new(i as u32, 0), &cmp);
        }
        assert!(bucket.remove(&Key::from_integer(1), &cmp));
        assert_eq!(bucket.size(), 2);
        assert_eq!(bucket.lookup(&Key::from_integer(1), &cmp), None);
        assert_eq!(
            bucket.lookup(&Key::from_integer(0), &cmp),
            Some(RecordId::new(0, 0))
        );
        assert_eq!(
            bucket.lookup(&Key::from_integer(2), &cmp),
            Some(RecordId::new(2, 0))
        );

        assert!(!bucket.remove(&Key::from_integer(1), &cmp));
    }

    #[test]
    fn test_clear_empties_bucket() {
        let mut buf = blank_page();
        let mut bucket = BucketPage::<Key, RecordId, _>::new(buf.as_mut_slice());
        bucket.init(4);
        let cmp = OrdComparator;
        bucket.insert(&Key::from_integer(1), &RecordId::new(1, 0), &cmp);
        bucket.clear();
        assert!(bucket.is_empty());
        assert_eq!(bucket.lookup(&Key::from_integer(1), &cmp), None);
    }

    #[test]
    fn test_default_capacity_fills_page() {
        let capacity = bucket_array_capacity::<Key, RecordId>();
        assert_eq!(capacity, ((PAGE_SIZE - 8) / 16) as u32);

        let mut buf = blank_page();
        let mut bucket = BucketPage::<Key, RecordId, _>::new(buf.as_mut_slice());
        bucket.init(capacity);
        let cmp = OrdComparator;
        for i in 0..capacity as u64 {
            assert!(bucket.insert(&Key::from_integer(i), &RecordId::new(i as u32, 0), &cmp));
        }
        assert!(bucket.is_full());
    }
}
