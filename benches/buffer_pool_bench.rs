use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;

use opaldb::storage::buffer::BufferPoolManager;

// Create temporary db for benchmarking
fn create_test_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, temp_file.path()).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("sequential_access", size),
            size,
            |b, &size| {
                let buffer_pool = create_test_buffer_pool(size);

                // Create some pages first
                let mut page_ids = Vec::new();
                for i in 0..size {
                    let (page_id, frame) = buffer_pool.new_page().unwrap();
                    frame.data().write()[0] = i as u8;
                    buffer_pool.unpin_page(page_id, true);
                    page_ids.push(page_id);
                }

                b.iter(|| {
                    for &page_id in &page_ids {
                        let frame = buffer_pool.fetch_page(page_id).unwrap();
                        let _first = frame.data().read()[0];
                        buffer_pool.unpin_page(page_id, false);
                    }
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("random_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);

            let mut page_ids = Vec::new();
            for i in 0..size {
                let (page_id, frame) = buffer_pool.new_page().unwrap();
                frame.data().write()[0] = i as u8;
                buffer_pool.unpin_page(page_id, true);
                page_ids.push(page_id);
            }

            let mut rng = rand::thread_rng();
            let random_indices: Vec<usize> =
                (0..size).map(|_| rng.gen_range(0..size)).collect();

            b.iter(|| {
                for &idx in &random_indices {
                    let page_id = page_ids[idx];
                    let frame = buffer_pool.fetch_page(page_id).unwrap();
                    let _first = frame.data().read()[0];
                    buffer_pool.unpin_page(page_id, false);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark);
criterion_main!(benches);
