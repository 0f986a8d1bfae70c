//! Concurrent Cache Usage Examples
//!
//! This example demonstrates multi-threaded usage patterns for wtinylfu caches.
//!
//! Run with: cargo run --example concurrent_usage

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use wtinylfu::{BoxError, Cache};

fn main() {
    println!("wtinylfu Concurrent Usage Examples");
    println!("==================================\n");

    basic_concurrent_usage();
    println!();

    single_flight_loading();
    println!();

    shard_tuning();
    println!();

    composed_layouts();
    println!();

    throughput_comparison();
}

/// Basic multi-threaded cache usage
fn basic_concurrent_usage() {
    println!("1. Basic Concurrent Usage");
    println!("   -----------------------");

    // Handles are cheap to clone and share the same entries
    let cache: Cache<String, usize> = Cache::builder()
        .maximum_size(1000)
        .build()
        .expect("valid configuration");

    let num_threads = 4;
    let ops_per_thread = 1000;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = format!("thread{}-key{}", thread_id, i);
                    let value = thread_id * 10000 + i;

                    cache.put(key.clone(), value);

                    // The entry may already have been evicted by another thread
                    if let Some(v) = cache.get(&key) {
                        assert_eq!(*v, value);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    cache.clean_up();

    println!(
        "   Completed {} operations across {} threads",
        num_threads * ops_per_thread * 2,
        num_threads
    );
    println!("   Final cache size: {} items", cache.estimated_size());
}

/// Concurrent callers of get_or_load share one load per key
fn single_flight_loading() {
    println!("2. Single-Flight Loading with get_or_load()");
    println!("   -----------------------------------------");

    let cache: Cache<u64, String> = Cache::builder()
        .maximum_size(100)
        .build()
        .expect("valid configuration");
    let loads = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let loads = Arc::clone(&loads);
            thread::spawn(move || {
                cache
                    .get_or_load(7, |key| {
                        loads.fetch_add(1, Ordering::SeqCst);
                        // Simulate a slow backend
                        thread::sleep(Duration::from_millis(50));
                        Ok::<_, BoxError>(format!("record #{key}"))
                    })
                    .expect("load succeeds")
            })
        })
        .collect();

    for handle in handles {
        let value = handle.join().expect("Thread panicked");
        assert_eq!(value.as_str(), "record #7");
    }
    println!("   8 threads asked for key 7");
    println!("   Backend was called {} time(s)", loads.load(Ordering::SeqCst));
}

/// Demonstrate shard count tuning
fn shard_tuning() {
    println!("3. Shard Count Tuning");
    println!("   -------------------");

    for shards in [4, 16, 64] {
        let cache: Cache<usize, usize> = Cache::builder()
            .maximum_size(10_000)
            .shards(shards)
            .build()
            .expect("valid configuration");
        let elapsed = run_writes(&cache, 8, 10_000);
        println!("   {:>2} shards: {:?} for 80,000 writes", shards, elapsed);
    }
    println!("   Reads never lock, so shards only matter for writers");
}

/// Each configuration gets only the components it needs
fn composed_layouts() {
    println!("4. Composed Layouts");
    println!("   -----------------");

    let unbounded: Cache<u64, u64> = Cache::builder().build().expect("valid configuration");
    let bounded: Cache<u64, u64> = Cache::builder()
        .maximum_size(100)
        .build()
        .expect("valid configuration");
    let full: Cache<u64, u64> = Cache::builder()
        .maximum_size(100)
        .expire_after_access(Duration::from_secs(60))
        .expire_after_write(Duration::from_secs(600))
        .record_stats()
        .removal_listener(|_, _, _| {})
        .build()
        .expect("valid configuration");

    for cache in [&unbounded, &bounded, &full] {
        println!("   {}", cache.layout().name());
        for line in cache.layout().to_string().lines() {
            println!("      {}", line);
        }
    }
}

/// Compare throughput with different thread counts
fn throughput_comparison() {
    println!("5. Throughput Comparison");
    println!("   ----------------------");

    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_size(10_000)
        .build()
        .expect("valid configuration");
    for i in 0..10_000 {
        cache.put(i, i);
    }

    for threads in [1, 2, 4, 8] {
        let start = Instant::now();
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..100_000 {
                        let key = (i * 31 + t) % 20_000;
                        if i % 10 == 0 {
                            cache.put(key, key);
                        } else {
                            std::hint::black_box(cache.get(&key));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }
        let elapsed = start.elapsed();
        let ops = threads * 100_000;
        println!(
            "   {} thread(s): {:>10.0} ops/sec",
            threads,
            ops as f64 / elapsed.as_secs_f64()
        );
    }
}

fn run_writes(cache: &Cache<usize, usize>, threads: usize, per_thread: usize) -> Duration {
    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    cache.put(t * per_thread + i, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    start.elapsed()
}
