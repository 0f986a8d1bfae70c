//! Concurrent Cache Benchmarks
//!
//! Benchmarks for measuring concurrent cache performance across different
//! access patterns, configurations and shard counts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::thread;
use std::time::Duration;
use wtinylfu::Cache;

const CACHE_SIZE: usize = 10_000;
const OPS_PER_THREAD: usize = 1_000;
const THREADS: usize = 8;

fn bounded() -> Cache<usize, usize> {
    Cache::builder().maximum_size(CACHE_SIZE as u64).build().unwrap()
}

fn filled(cache: Cache<usize, usize>) -> Cache<usize, usize> {
    for i in 0..CACHE_SIZE {
        cache.put(i, i);
    }
    cache
}

/// Benchmark concurrent reads against differently composed caches
fn concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Reads");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let caches = [
        ("unbounded", filled(Cache::builder().build().unwrap())),
        ("bounded", filled(bounded())),
        (
            "bounded + expiring",
            filled(
                Cache::builder()
                    .maximum_size(CACHE_SIZE as u64)
                    .expire_after_access(Duration::from_secs(600))
                    .build()
                    .unwrap(),
            ),
        ),
        (
            "bounded + stats",
            filled(
                Cache::builder()
                    .maximum_size(CACHE_SIZE as u64)
                    .record_stats()
                    .build()
                    .unwrap(),
            ),
        ),
    ];

    for (name, cache) in &caches {
        group.bench_function(*name, |b| {
            b.iter(|| run_concurrent_reads(cache, THREADS, OPS_PER_THREAD));
        });
    }

    group.finish();
}

/// Benchmark concurrent writes, most of which evict
fn concurrent_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Writes");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    group.bench_function("bounded", |b| {
        let cache = bounded();
        b.iter(|| run_concurrent_writes(&cache, THREADS, OPS_PER_THREAD));
    });

    group.bench_function("weighted", |b| {
        let cache: Cache<usize, usize> = Cache::builder()
            .maximum_weight((CACHE_SIZE * 5) as u64)
            .weigher(|key, _value| (*key % 10 + 1) as u32)
            .build()
            .unwrap();
        b.iter(|| run_concurrent_writes(&cache, THREADS, OPS_PER_THREAD));
    });

    group.finish();
}

/// Benchmark a read-heavy mixed workload (80% reads, 20% writes)
fn concurrent_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Mixed");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let cache = filled(bounded());
    group.bench_function("bounded", |b| {
        b.iter(|| run_concurrent_mixed(&cache, THREADS, OPS_PER_THREAD));
    });

    group.finish();
}

/// Compare throughput across shard counts
fn shard_count_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Shard Count Comparison");
    group.throughput(Throughput::Elements((16 * OPS_PER_THREAD) as u64));

    for shards in [1, 4, 16, 64] {
        let cache = filled(
            Cache::builder()
                .maximum_size(CACHE_SIZE as u64)
                .shards(shards)
                .build()
                .unwrap(),
        );
        group.bench_with_input(BenchmarkId::new("mixed", shards), &cache, |b, cache| {
            b.iter(|| run_concurrent_mixed(cache, 16, OPS_PER_THREAD));
        });
    }

    group.finish();
}

fn run_concurrent_reads(cache: &Cache<usize, usize>, num_threads: usize, ops_per_thread: usize) {
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = cache.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = (t * ops_per_thread + i) % CACHE_SIZE;
                black_box(cache.get(&key));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn run_concurrent_writes(cache: &Cache<usize, usize>, num_threads: usize, ops_per_thread: usize) {
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = cache.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = t * ops_per_thread * 100 + i;
                cache.put(key, i);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn run_concurrent_mixed(cache: &Cache<usize, usize>, num_threads: usize, ops_per_thread: usize) {
    let mut handles = Vec::with_capacity(num_threads);
    for t in 0..num_threads {
        let cache = cache.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = (t * ops_per_thread + i) % (CACHE_SIZE * 2);
                if i % 5 == 0 {
                    cache.put(key, key);
                } else {
                    black_box(cache.get(&key));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

criterion_group!(
    benches,
    concurrent_reads,
    concurrent_writes,
    concurrent_mixed,
    shard_count_comparison
);
criterion_main!(benches);
