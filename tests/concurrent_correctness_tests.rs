//! Concurrent Cache Correctness Tests
//!
//! These tests validate that the cache keeps its invariants while being
//! accessed from multiple threads.
//!
//! ## Test Strategy
//!
//! Unlike stress tests that focus on volume and lack of panics, these tests:
//! - Use small caches so that eviction runs constantly
//! - Join every thread, call `clean_up`, then check exact invariants
//! - Count loader and listener invocations to detect lost or duplicated work
//!
//! ## Segments
//!
//! 1. **Bounds**: size and weight stay within the maximum
//! 2. **Loading**: one load per key under contention
//! 3. **Notifications**: every removal is reported exactly once

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wtinylfu::{BoxError, Cache, RemovalCause};

const THREADS: usize = 8;

// ============================================================================
// SEGMENT 1: BOUNDS
// ============================================================================

#[test]
fn test_concurrent_puts_respect_maximum_size() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(100).build().unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    cache.put(t * 10_000 + i, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    cache.clean_up();
    assert!(cache.estimated_size() <= 100);
    assert_eq!(cache.weighted_size(), Some(cache.estimated_size()));

    let snapshot = cache.policy_snapshot();
    let linked = snapshot.window.len() + snapshot.probation.len() + snapshot.protected.len();
    assert_eq!(linked as u64, cache.estimated_size());
}

#[test]
fn test_concurrent_updates_keep_weights_consistent() {
    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_weight(1_000)
        .weigher(|_key, value: &usize| (*value % 10 + 1) as u32)
        .build()
        .unwrap();

    let mut pool = scoped_threadpool::Pool::new(THREADS as u32);
    pool.scoped(|scope| {
        for t in 0..THREADS {
            let cache = &cache;
            scope.execute(move || {
                for i in 0..5_000 {
                    cache.put(i % 300, t + i);
                    if i % 7 == 0 {
                        cache.invalidate(&(i % 300));
                    }
                }
            });
        }
    });

    cache.clean_up();
    let snapshot = cache.policy_snapshot();
    let expected: u64 = snapshot
        .window
        .iter()
        .chain(&snapshot.probation)
        .chain(&snapshot.protected)
        .filter_map(|key| cache.get(&**key))
        .map(|value| (*value % 10 + 1) as u64)
        .sum();
    assert!(cache.weighted_size().unwrap() <= 1_000);
    assert_eq!(cache.weighted_size(), Some(expected));
}

#[test]
fn test_readers_and_writers() {
    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_size(500)
        .record_stats()
        .build()
        .unwrap();
    for i in 0..500 {
        cache.put(i, i);
    }

    let mut pool = scoped_threadpool::Pool::new(THREADS as u32);
    pool.scoped(|scope| {
        for t in 0..THREADS {
            let cache = &cache;
            scope.execute(move || {
                for i in 0..10_000 {
                    let key = (i * 31 + t) % 1_000;
                    if t % 2 == 0 {
                        if let Some(value) = cache.get(&key) {
                            assert_eq!(*value, key, "Values never mix between keys");
                        }
                    } else {
                        cache.put(key, key);
                    }
                }
            });
        }
    });

    cache.clean_up();
    assert!(cache.estimated_size() <= 500);
    let stats = cache.stats();
    assert_eq!(stats.request_count(), (THREADS as u64 / 2) * 10_000);
}

// ============================================================================
// SEGMENT 2: LOADING
// ============================================================================

#[test]
fn test_concurrent_loads_run_once() {
    let cache: Cache<u32, String> = Cache::builder().build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                cache
                    .get_or_load(42, |key| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok::<_, BoxError>(format!("value-{key}"))
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(*handle.join().unwrap(), "value-42");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_loads_of_distinct_keys_do_not_interfere() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(1_000).build().unwrap();
    let calls = AtomicUsize::new(0);

    let mut pool = scoped_threadpool::Pool::new(THREADS as u32);
    pool.scoped(|scope| {
        for _ in 0..THREADS {
            let cache = &cache;
            let calls = &calls;
            scope.execute(move || {
                for key in 0..200 {
                    let value = cache
                        .get_or_load(key, |key| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, BoxError>(key * 3)
                        })
                        .unwrap();
                    assert_eq!(*value, key * 3);
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 200);
}

// ============================================================================
// SEGMENT 3: NOTIFICATIONS
// ============================================================================

#[test]
fn test_every_insert_is_accounted_for() {
    let removed = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&removed);
    let cache: Cache<usize, usize> = Cache::builder()
        .maximum_size(50)
        .removal_listener(move |_key, _value, cause| {
            *sink.lock().entry(cause).or_insert(0_u64) += 1;
        })
        .build()
        .unwrap();

    let mut pool = scoped_threadpool::Pool::new(THREADS as u32);
    pool.scoped(|scope| {
        for t in 0..THREADS {
            let cache = &cache;
            scope.execute(move || {
                for i in 0..1_000 {
                    cache.put(t * 1_000 + i, i);
                }
            });
        }
    });
    cache.clean_up();

    let removed = removed.lock();
    let evicted = removed.get(&RemovalCause::Size).copied().unwrap_or(0);
    assert_eq!(removed.len(), 1, "Distinct keys are only evicted: {removed:?}");
    assert_eq!(evicted + cache.estimated_size(), (THREADS * 1_000) as u64);
}

#[test]
fn test_invalidate_all_while_writing() {
    let cache: Cache<usize, usize> = Cache::builder().maximum_size(200).build().unwrap();

    let mut pool = scoped_threadpool::Pool::new(THREADS as u32);
    pool.scoped(|scope| {
        for t in 0..THREADS {
            let cache = &cache;
            scope.execute(move || {
                for i in 0..2_000 {
                    if t == 0 && i % 500 == 0 {
                        cache.invalidate_all();
                    } else {
                        cache.put(i % 400, i);
                    }
                }
            });
        }
    });

    cache.clean_up();
    assert!(cache.estimated_size() <= 200);
    let snapshot = cache.policy_snapshot();
    let linked = snapshot.window.len() + snapshot.probation.len() + snapshot.protected.len();
    assert_eq!(linked as u64, cache.estimated_size());
}
