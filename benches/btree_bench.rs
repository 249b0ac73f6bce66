use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use basaltdb::common::types::Rid;
use basaltdb::concurrency::{IsolationLevel, Transaction};
use basaltdb::storage::buffer::{BufferPool, BufferPoolInstance};
use basaltdb::storage::disk::DiskManager;
use basaltdb::BPlusTree;

fn create_bench_tree() -> (BPlusTree<i64, Rid>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(file.path()).unwrap());
    let buffer_pool: Arc<dyn BufferPool> = Arc::new(BufferPoolInstance::new(256, disk_manager));

    let (_, header_page_id) = buffer_pool.new_page().unwrap();
    buffer_pool.unpin_page(header_page_id, true).unwrap();

    let tree = BPlusTree::new("bench_index", buffer_pool, header_page_id, 64, 64).unwrap();
    (tree, file)
}

fn bench_sequential_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_10k_sequential", |b| {
        b.iter_with_setup(create_bench_tree, |(tree, _file)| {
            let txn = Transaction::new(0, IsolationLevel::RepeatableRead);
            for key in 0..10_000i64 {
                tree.insert(&key, &Rid::new(0, key as u32), &txn).unwrap();
            }
        });
    });
}

fn bench_point_lookups(c: &mut Criterion) {
    let (tree, _file) = create_bench_tree();
    let txn = Transaction::new(0, IsolationLevel::RepeatableRead);
    for key in 0..10_000i64 {
        tree.insert(&key, &Rid::new(0, key as u32), &txn).unwrap();
    }

    c.bench_function("btree_get_10k", |b| {
        b.iter(|| {
            for key in (0..10_000i64).step_by(97) {
                criterion::black_box(tree.get(&key).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_sequential_insert, bench_point_lookups);
criterion_main!(benches);
