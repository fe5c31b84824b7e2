use std::sync::Arc;
use std::time::{Duration, Instant};

use buffer_pool_manager::api::AccessType;
use buffer_pool_manager::buffer_pool::BufferPoolManager;
use buffer_pool_manager::disk_manager::DiskManager;
use clap::Parser;
use hash_index::key::{DefaultKeyHasher, GenericKey, OrdComparator, RecordId};
use hash_index::DiskExtendibleHashTable;

type BenchKey = GenericKey<8>;
type BenchTable = DiskExtendibleHashTable<BenchKey, RecordId, OrdComparator, DefaultKeyHasher>;

#[derive(Parser, Debug)]
#[command(version, about = "Workload driver for the buffer pool and hash index", long_about = None)]
struct Args {
    /// Number of frames in the buffer pool
    #[arg(long, default_value_t = 256)]
    pool_size: usize,

    /// Backward k-distance for the LRU-K replacer
    #[arg(long, default_value_t = 2)]
    replacer_k: usize,

    /// Number of pages / keys each workload touches
    #[arg(long, default_value_t = 10_000)]
    operations: usize,
}

struct BenchmarkResult {
    page_write: Duration,
    page_read: Duration,
    index_insert: Duration,
    index_get: Duration,
    index_remove: Duration,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    println!(
        "pool_size={} replacer_k={} operations={}",
        args.pool_size, args.replacer_k, args.operations
    );

    let temp_dir = tempfile::tempdir().expect("failed to create scratch directory");
    let disk_manager = match DiskManager::new(temp_dir.path().join("benchmark.db")) {
        Ok(dm) => Arc::new(dm),
        Err(e) => {
            eprintln!("Failed to create disk manager: {e}");
            return;
        }
    };
    let bpm = Arc::new(BufferPoolManager::new(
        args.pool_size,
        disk_manager,
        args.replacer_k,
    ));

    let (page_write, page_read) = run_page_workload(&bpm, args.operations);
    let (index_insert, index_get, index_remove) = run_index_workload(bpm, args.operations);
    let results = BenchmarkResult {
        page_write,
        page_read,
        index_insert,
        index_get,
        index_remove,
    };

    println!("\n--- Benchmark Results ---");
    println!("| Workload       | Time            |");
    println!("|----------------|-----------------|");
    println!("| page write     | {:<15?} |", results.page_write);
    println!("| page read      | {:<15?} |", results.page_read);
    println!("| index insert   | {:<15?} |", results.index_insert);
    println!("| index get      | {:<15?} |", results.index_get);
    println!("| index remove   | {:<15?} |", results.index_remove);
}

fn run_page_workload(bpm: &BufferPoolManager, operations: usize) -> (Duration, Duration) {
    let mut page_ids = Vec::with_capacity(operations);

    let start = Instant::now();
    for i in 0..operations {
        let page = bpm.new_page().expect("pool exhausted during write workload");
        page_ids.push(page.page_id());
        let mut guard = page.upgrade_write();
        guard[0] = i as u8;
    }
    bpm.flush_all_pages().expect("flush failed");
    let write_time = start.elapsed();

    let start = Instant::now();
    for &page_id in &page_ids {
        let _page = bpm
            .fetch_page(page_id, AccessType::Lookup)
            .expect("fetch failed during read workload");
    }
    let read_time = start.elapsed();

    (write_time, read_time)
}

fn run_index_workload(
    bpm: Arc<BufferPoolManager>,
    operations: usize,
) -> (Duration, Duration, Duration) {
    let table = BenchTable::new("benchmark", bpm, OrdComparator, DefaultKeyHasher, 4, 9, None)
        .expect("failed to create index");

    let start = Instant::now();
    for i in 0..operations as u64 {
        table
            .insert(&BenchKey::from_integer(i), &RecordId::new(i as u32, 0), None)
            .expect("insert failed");
    }
    let insert_time = start.elapsed();

    let mut result = Vec::new();
    let start = Instant::now();
    for i in 0..operations as u64 {
        result.clear();
        table
            .get_value(&BenchKey::from_integer(i), &mut result, None)
            .expect("get failed");
    }
    let get_time = start.elapsed();

    let start = Instant::now();
    for i in 0..operations as u64 {
        table
            .remove(&BenchKey::from_integer(i), None)
            .expect("remove failed");
    }
    let remove_time = start.elapsed();

    (insert_time, get_time, remove_time)
}
