use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use buffer_pool_manager::api::PageId;
use buffer_pool_manager::buffer_pool::BufferPoolManager;
use buffer_pool_manager::disk_manager::DiskManager;
use hash_index::directory_page::DirectoryPage;
use hash_index::header_page::HeaderPage;
use hash_index::key::{
    DefaultKeyHasher, GenericKey, KeyHasher, OrdComparator, RecordId,
};
use hash_index::DiskExtendibleHashTable;
use tempfile::TempDir;

/// Routes each key to the bucket its own value names, so tests can steer
/// keys into chosen hash classes.
#[derive(Debug, Clone, Copy, Default)]
struct IdentityHasher;

impl KeyHasher<u32> for IdentityHasher {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}

type SmallTable = DiskExtendibleHashTable<u32, u64, OrdComparator, IdentityHasher>;

fn setup(pool_size: usize) -> (TempDir, Arc<BufferPoolManager>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_dir.path().join("test.db")).unwrap());
    (temp_dir, Arc::new(BufferPoolManager::new(pool_size, disk_manager, 2)))
}

/// Builds the table used by the split/merge scenarios: two-slot buckets and
/// room to grow the directory three levels deep.
fn small_table(bpm: Arc<BufferPoolManager>) -> SmallTable {
    SmallTable::new("scenario", bpm, OrdComparator, IdentityHasher, 2, 3, Some(2)).unwrap()
}

/// Reads the single directory the identity-hashed scenarios use (small keys
/// all route to header slot 0).
fn inspect_directory(bpm: &BufferPoolManager, header_page_id: PageId) -> (u32, HashSet<PageId>) {
    let header_guard = bpm.fetch_page_read(header_page_id).unwrap();
    let directory_page_id = HeaderPage::new(&header_guard[..]).directory_page_id(0);
    drop(header_guard);

    let directory_guard = bpm.fetch_page_read(directory_page_id).unwrap();
    let directory = DirectoryPage::new(&directory_guard[..]);
    let buckets = (0..directory.size())
        .map(|idx| directory.bucket_page_id(idx))
        .collect();
    (directory.global_depth(), buckets)
}

#[test]
fn test_insert_get_remove_roundtrip() {
    let (_temp_dir, bpm) = setup(50);
    let table = DiskExtendibleHashTable::<GenericKey<8>, RecordId, _, _>::new(
        "roundtrip",
        bpm,
        OrdComparator,
        DefaultKeyHasher,
        2,
        9,
        None,
    )
    .unwrap();

    for i in 0..200u64 {
        let key = GenericKey::from_integer(i);
        let rid = RecordId::new(i as u32, (i % 16) as u32);
        assert!(table.insert(&key, &rid, None).unwrap(), "insert {i}");
    }
    table.verify_integrity().unwrap();

    let mut result = Vec::new();
    for i in 0..200u64 {
        result.clear();
        let key = GenericKey::from_integer(i);
        assert!(table.get_value(&key, &mut result, None).unwrap());
        assert_eq!(result, vec![RecordId::new(i as u32, (i % 16) as u32)]);
    }
    result.clear();
    assert!(!table
        .get_value(&GenericKey::from_integer(9999), &mut result, None)
        .unwrap());

    for i in (0..200u64).step_by(2) {
        assert!(table.remove(&GenericKey::from_integer(i), None).unwrap());
    }
    table.verify_integrity().unwrap();
    for i in 0..200u64 {
        result.clear();
        let found = table
            .get_value(&GenericKey::from_integer(i), &mut result, None)
            .unwrap();
        assert_eq!(found, i % 2 == 1, "key {i}");
    }
}

#[test]
fn test_duplicate_insert_fails() {
    let (_temp_dir, bpm) = setup(10);
    let table = small_table(bpm);

    assert!(table.insert(&7, &70, None).unwrap());
    assert!(!table.insert(&7, &71, None).unwrap());

    let mut result = Vec::new();
    assert!(table.get_value(&7, &mut result, None).unwrap());
    assert_eq!(result, vec![70]);
}

#[test]
fn test_remove_is_idempotent() {
    let (_temp_dir, bpm) = setup(10);
    let table = small_table(bpm);

    assert!(table.insert(&7, &70, None).unwrap());
    assert!(table.remove(&7, None).unwrap());
    assert!(!table.remove(&7, None).unwrap());

    let mut result = Vec::new();
    assert!(!table.get_value(&7, &mut result, None).unwrap());
    // Removing from an index whose key never existed reports false too.
    assert!(!table.remove(&12345, None).unwrap());
}

#[test]
fn test_directory_grows_on_splits() {
    let (_temp_dir, bpm) = setup(10);
    let table = small_table(bpm.clone());

    // Keys 0 and 4 collide on the low two bits, so inserting 2 then 8 keeps
    // splitting the same bucket until depth three separates 0 from 4 and 8.
    for (key, value) in [(0u32, 100u64), (4, 104), (2, 102), (8, 108)] {
        assert!(table.insert(&key, &value, None).unwrap(), "insert {key}");
        table.verify_integrity().unwrap();
    }

    let (global_depth, buckets) = inspect_directory(&bpm, table.header_page_id());
    assert_eq!(global_depth, 3);
    assert_eq!(buckets.len(), 4);

    let mut result = Vec::new();
    for (key, value) in [(0u32, 100u64), (4, 104), (2, 102), (8, 108)] {
        result.clear();
        assert!(table.get_value(&key, &mut result, None).unwrap());
        assert_eq!(result, vec![value]);
    }
}

#[test]
fn test_empty_buckets_merge_and_directory_shrinks() {
    let (_temp_dir, bpm) = setup(10);
    let table = small_table(bpm.clone());

    for (key, value) in [(0u32, 100u64), (4, 104), (2, 102), (8, 108)] {
        table.insert(&key, &value, None).unwrap();
    }
    assert_eq!(inspect_directory(&bpm, table.header_page_id()).0, 3);

    // Removing 8 leaves its bucket non-empty (0 remains): nothing merges.
    assert!(table.remove(&8, None).unwrap());
    table.verify_integrity().unwrap();
    assert_eq!(inspect_directory(&bpm, table.header_page_id()).0, 3);

    // Removing 0 empties that bucket; it merges with its split image and
    // the directory no longer needs the third bit.
    assert!(table.remove(&0, None).unwrap());
    table.verify_integrity().unwrap();
    assert_eq!(inspect_directory(&bpm, table.header_page_id()).0, 2);

    assert!(table.remove(&4, None).unwrap());
    table.verify_integrity().unwrap();
    assert_eq!(inspect_directory(&bpm, table.header_page_id()).0, 1);

    // The last deletion cascades: every bucket is empty, so merges run all
    // the way down and the directory collapses to a single slot.
    assert!(table.remove(&2, None).unwrap());
    table.verify_integrity().unwrap();
    let (global_depth, buckets) = inspect_directory(&bpm, table.header_page_id());
    assert_eq!(global_depth, 0);
    assert_eq!(buckets.len(), 1);

    let mut result = Vec::new();
    for key in [0u32, 2, 4, 8] {
        result.clear();
        assert!(!table.get_value(&key, &mut result, None).unwrap());
    }
}

#[test]
fn test_insert_fails_when_depths_saturated() {
    let (_temp_dir, bpm) = setup(10);
    // One-entry buckets under a directory capped at depth one: at most two
    // hash classes fit.
    let table =
        SmallTable::new("saturated", bpm, OrdComparator, IdentityHasher, 2, 1, Some(1)).unwrap();

    assert!(table.insert(&0, &100, None).unwrap());
    assert!(table.insert(&1, &101, None).unwrap());
    // Key 2 lands on bucket 0, which is full and cannot split further.
    assert!(!table.insert(&2, &102, None).unwrap());

    let mut result = Vec::new();
    assert!(!table.get_value(&2, &mut result, None).unwrap());
    assert!(table.get_value(&0, &mut result, None).unwrap());
    assert_eq!(result, vec![100]);
}

#[test]
fn test_eviction_churn_does_not_lose_entries() {
    // A pool far smaller than the page set forces constant eviction inside
    // index operations.
    let (_temp_dir, bpm) = setup(8);
    let table =
        SmallTable::new("churn", bpm.clone(), OrdComparator, IdentityHasher, 2, 9, Some(2))
            .unwrap();

    for key in 0..128u32 {
        assert!(table.insert(&key, &(key as u64 * 10), None).unwrap(), "insert {key}");
    }
    table.verify_integrity().unwrap();

    let mut result = Vec::new();
    for key in 0..128u32 {
        result.clear();
        assert!(table.get_value(&key, &mut result, None).unwrap(), "get {key}");
        assert_eq!(result, vec![key as u64 * 10]);
    }

    for key in 0..128u32 {
        assert!(table.remove(&key, None).unwrap(), "remove {key}");
    }
    table.verify_integrity().unwrap();
    assert_eq!(inspect_directory(&bpm, table.header_page_id()).0, 0);
}

#[test]
fn test_reopen_after_flush() {
    let (_temp_dir, bpm) = setup(20);
    let table = small_table(bpm.clone());
    for key in 0..16u32 {
        table.insert(&key, &(key as u64 + 1000), None).unwrap();
    }
    let header_page_id = table.header_page_id();
    drop(table);
    bpm.flush_all_pages().unwrap();

    let reopened = SmallTable::open(
        "scenario",
        bpm,
        OrdComparator,
        IdentityHasher,
        header_page_id,
        3,
        Some(2),
    );
    let mut result = Vec::new();
    for key in 0..16u32 {
        result.clear();
        assert!(reopened.get_value(&key, &mut result, None).unwrap());
        assert_eq!(result, vec![key as u64 + 1000]);
    }
}

#[test]
fn test_concurrent_readers_with_writer() {
    let (_temp_dir, bpm) = setup(20);
    let table = Arc::new(
        SmallTable::new("concurrent", bpm, OrdComparator, IdentityHasher, 2, 9, None).unwrap(),
    );

    table.insert(&1, &111, None).unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let table = table.clone();
        readers.push(thread::spawn(move || {
            let mut result = Vec::new();
            for _ in 0..200 {
                result.clear();
                assert!(table.get_value(&1, &mut result, None).unwrap());
                assert_eq!(result, vec![111]);
            }
        }));
    }

    let writer_table = table.clone();
    let writer = thread::spawn(move || {
        let mut inserted = 0;
        for key in 100..200u32 {
            if writer_table.insert(&key, &(key as u64), None).unwrap() {
                inserted += 1;
            }
        }
        for key in 100..200u32 {
            assert!(writer_table.remove(&key, None).unwrap());
        }
        inserted
    });

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(writer.join().unwrap(), 100);

    // Quiescent state: only the readers' key remains.
    let mut result = Vec::new();
    assert!(table.get_value(&1, &mut result, None).unwrap());
    for key in 100..200u32 {
        result.clear();
        assert!(!table.get_value(&key, &mut result, None).unwrap());
    }
    table.verify_integrity().unwrap();
}
