use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use buffer_pool_manager::api::AccessType;
use buffer_pool_manager::buffer_pool::BufferPoolManager;
use buffer_pool_manager::disk_manager::DiskManager;
use tempfile::TempDir;

const POOL_SIZE: usize = 100;
const REPLACER_K: usize = 2;
const NUM_PAGES: usize = 1000;

fn setup_bpm(temp_dir: &TempDir, name: &str) -> BufferPoolManager {
    let disk_manager = Arc::new(DiskManager::new(temp_dir.path().join(name)).unwrap());
    BufferPoolManager::new(POOL_SIZE, disk_manager, REPLACER_K)
}

// Benchmark creating and flushing pages through the pool
fn bench_write_pages(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_pages");
    group.sample_size(10);

    let temp_dir = tempfile::tempdir().unwrap();
    group.bench_function("new_page", |b| {
        b.iter_custom(|iters| {
            let start = std::time::Instant::now();
            for i in 0..iters {
                // A fresh BPM per iteration so the free list starts full.
                let bpm = setup_bpm(&temp_dir, &format!("write_{i}.db"));
                for _ in 0..black_box(NUM_PAGES) {
                    let page = bpm.new_page().unwrap();
                    let mut guard = page.upgrade_write();
                    guard[0] = 1;
                }
                bpm.flush_all_pages().unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

// Benchmark fetching pages, mostly from cache with some disk traffic
fn bench_read_pages(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_pages");
    group.sample_size(10);

    let temp_dir = tempfile::tempdir().unwrap();
    let bpm = setup_bpm(&temp_dir, "read.db");
    let mut page_ids = Vec::with_capacity(NUM_PAGES);
    for _ in 0..NUM_PAGES {
        let page = bpm.new_page().unwrap();
        page_ids.push(page.page_id());
    }
    bpm.flush_all_pages().unwrap();

    group.bench_function("fetch_page", |b| {
        b.iter(|| {
            for &page_id in black_box(&page_ids) {
                let _page = black_box(bpm.fetch_page(page_id, AccessType::Lookup).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(std::time::Duration::from_secs(10));
    targets = bench_write_pages, bench_read_pages
}
criterion_main!(benches);
