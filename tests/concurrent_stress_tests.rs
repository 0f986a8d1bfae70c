//! Stress Tests for the Concurrent Cache
//!
//! These tests verify thread safety and invariants under high contention for
//! every combination of components the cache can be composed from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wtinylfu::{BoxError, Cache, CacheBuilder, FakeTicker};

const NUM_THREADS: usize = 16;
const OPS_PER_THREAD: usize = 10_000;

/// Runs a mixed workload of reads, writes, loads and removals.
fn hammer(cache: &Cache<usize, usize>, key_space: usize) {
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = (i * 7 + t * 13) % key_space;
                    match i % 10 {
                        0 => cache.invalidate(&key),
                        1..=3 => cache.put(key, key),
                        4 => {
                            let value = cache.get_or_load(key, |k| Ok::<_, BoxError>(*k)).unwrap();
                            assert_eq!(*value, key);
                        }
                        _ => {
                            if let Some(value) = cache.get(&key) {
                                assert_eq!(*value, key);
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

fn assert_linked_matches_table(cache: &Cache<usize, usize>) {
    cache.clean_up();
    let snapshot = cache.policy_snapshot();
    let linked = snapshot.window.len() + snapshot.probation.len() + snapshot.protected.len();
    assert_eq!(linked as u64, cache.estimated_size());
}

/// Test high contention with many threads hammering the same few keys
#[test]
fn stress_high_contention() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(10).build().unwrap();
    hammer(&cache, 20);
    assert!(cache.estimated_size() <= 10);
    assert_linked_matches_table(&cache);
}

#[test]
fn stress_large_key_space() {
    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_size(1_000)
        .record_stats()
        .build()
        .unwrap();
    hammer(&cache, 100_000);
    cache.clean_up();
    assert!(cache.estimated_size() <= 1_000);
    assert!(cache.stats().request_count() > 0);
    assert_linked_matches_table(&cache);
}

#[test]
fn stress_shard_counts() {
    for shards in [1, 2, 8, 64] {
        let cache: Cache<usize, usize> = Cache::builder()
            .maximum_size(100)
            .shards(shards)
            .build()
            .unwrap();
        hammer(&cache, 500);
        cache.clean_up();
        assert!(cache.estimated_size() <= 100, "shards = {shards}");
    }
}

#[test]
fn stress_single_entry_cache() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(1).build().unwrap();
    hammer(&cache, 50);
    cache.clean_up();
    assert!(cache.estimated_size() <= 1);
}

#[test]
fn stress_weighted() {
    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_weight(5_000)
        .weigher(|key, _value| (*key % 50 + 1) as u32)
        .build()
        .unwrap();
    hammer(&cache, 2_000);
    cache.clean_up();
    assert!(cache.weighted_size().unwrap() <= 5_000);
}

#[test]
fn stress_expiring() {
    let ticker = FakeTicker::new();
    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_size(500)
        .expire_after_access(Duration::from_secs(5))
        .expire_after_write(Duration::from_secs(10))
        .ticker(ticker.clone())
        .build()
        .unwrap();

    let clock = {
        let ticker = ticker.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                ticker.advance(Duration::from_millis(100));
                thread::yield_now();
            }
        })
    };
    hammer(&cache, 1_000);
    clock.join().unwrap();

    ticker.advance(Duration::from_secs(11));
    cache.clean_up();
    assert_eq!(cache.estimated_size(), 0);
}

#[test]
fn stress_unbounded() {
    let cache: Cache<usize, usize> = Cache::builder().build().unwrap();
    hammer(&cache, 1_000);
    assert!(cache.estimated_size() <= 1_000);
    assert!(cache.weighted_size().is_none());
}

#[test]
fn stress_weak_values() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(100).weak_values().build().unwrap();
    let held: Vec<Arc<usize>> = (0..50).map(Arc::new).collect();
    for (key, value) in held.iter().enumerate() {
        cache.put_shared(Arc::new(key), Arc::clone(value));
    }
    hammer(&cache, 200);
    cache.clean_up();

    // Nothing outside the held values keeps a value alive
    assert!(cache.estimated_size() <= 50);
    assert_linked_matches_table(&cache);
}

#[test]
fn stress_concurrent_invalidate_all() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(1_000).build().unwrap();
    let clears = Arc::new(AtomicUsize::new(0));
    let clearer = {
        let cache = cache.clone();
        let clears = Arc::clone(&clears);
        thread::spawn(move || {
            for _ in 0..100 {
                cache.invalidate_all();
                clears.fetch_add(1, Ordering::Relaxed);
                thread::yield_now();
            }
        })
    };
    hammer(&cache, 2_000);
    clearer.join().unwrap();

    assert_eq!(clears.load(Ordering::Relaxed), 100);
    assert!(cache.estimated_size() <= 1_000);
    assert_linked_matches_table(&cache);
}

#[test]
fn stress_removal_listener() {
    let notified = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&notified);
    let builder: CacheBuilder<usize, usize> = Cache::builder()
        .maximum_size(100)
        .removal_listener(move |_, _, _| {
            count.fetch_add(1, Ordering::Relaxed);
        });
    let cache = builder.build().unwrap();
    hammer(&cache, 1_000);
    cache.clean_up();
    assert!(notified.load(Ordering::Relaxed) > 0);
}
