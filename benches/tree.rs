//! Index benchmarks: insert throughput, point lookups, and full scans over
//! a populated tree.

use bucktree::{RecordStatus, TreeIndex, TreeIndexOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

fn options() -> TreeIndexOptions {
    TreeIndexOptions::default()
        .key_size(16)
        .doc_id_size(16)
        .node_capacity(64)
}

fn populated(count: u32) -> (tempfile::TempDir, TreeIndex) {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "bench", options()).unwrap();
    for i in 0..count {
        index
            .insert(
                format!("doc{i:08}").as_bytes(),
                format!("key{i:08}").as_bytes(),
                i,
                8,
                RecordStatus::Live,
            )
            .unwrap();
    }
    (dir, index)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_insert");
    for count in [1_000u32, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("sequential", count),
            &count,
            |b, &count| {
                b.iter_with_setup(
                    || {
                        let dir = tempdir().unwrap();
                        let index = TreeIndex::create(dir.path(), "bench", options()).unwrap();
                        (dir, index)
                    },
                    |(dir, mut index)| {
                        for i in 0..count {
                            index
                                .insert(
                                    format!("doc{i:08}").as_bytes(),
                                    format!("key{i:08}").as_bytes(),
                                    i,
                                    8,
                                    RecordStatus::Live,
                                )
                                .unwrap();
                        }
                        (dir, index)
                    },
                );
            },
        );
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_get");
    let (_dir, mut index) = populated(10_000);
    group.bench_function("point_lookup", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("key{:08}", i % 10_000);
            i = i.wrapping_add(2_741);
            black_box(index.get(key.as_bytes()).unwrap());
        });
    });
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_scan");
    let (_dir, mut index) = populated(10_000);
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("full_ascending", |b| {
        b.iter(|| {
            let count = index.all(None, 0).unwrap().count();
            black_box(count);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_get, bench_scan);
criterion_main!(benches);
