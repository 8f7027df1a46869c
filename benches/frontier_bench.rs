use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;

use golamv2::models::{CrawlMode, UrlTask};
use golamv2::{PriorityFrontier, Storage, UrlBloom};

fn bench_frontier_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("frontier");

    for size in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("push_pop", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(Storage::open(dir.path(), CrawlMode::All, 64).unwrap());
            let frontier = PriorityFrontier::with_capacity(storage, size);

            b.iter(|| {
                for i in 0..size {
                    let task = UrlTask {
                        url: format!("https://bench.local/{}", i),
                        depth: (i % 6) as u32,
                        timestamp: 1_700_000_000 + i as u64,
                        retries: 0,
                    };
                    frontier.push(task).unwrap();
                }
                for _ in 0..size {
                    black_box(frontier.pop().unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_bloom_add_test(c: &mut Criterion) {
    let mut group = c.benchmark_group("bloom");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("add", |b| {
        let bloom = UrlBloom::new().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            for _ in 0..1_000 {
                bloom.add(&format!("https://bench.local/{}", i));
                i += 1;
            }
        });
    });

    group.bench_function("test_hit", |b| {
        let bloom = UrlBloom::new().unwrap();
        for i in 0..1_000 {
            bloom.add(&format!("https://bench.local/{}", i));
        }
        b.iter(|| {
            for i in 0..1_000 {
                black_box(bloom.test(&format!("https://bench.local/{}", i)));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_frontier_push_pop, bench_bloom_add_test);
criterion_main!(benches);
