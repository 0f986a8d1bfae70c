//! Cache Statistics Demonstration
//!
//! Shows the counters collected by a cache built with `record_stats`, the
//! removal causes reported to a listener, and how expiration interacts with
//! both when time is driven by a `FakeTicker`.
//!
//! Run with: cargo run --example stats_demo

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wtinylfu::{BoxError, Cache, FakeTicker, RemovalCause};

fn main() {
    println!("Cache Statistics - Demonstration");
    println!("================================\n");

    let ticker = FakeTicker::new();
    let causes: Arc<Mutex<BTreeMap<String, u64>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let sink = Arc::clone(&causes);

    let cache: Cache<&'static str, u32> = Cache::builder()
        .maximum_size(3)
        .expire_after_write(Duration::from_secs(30))
        .record_stats()
        .ticker(ticker.clone())
        .removal_listener(move |key, _value, cause: RemovalCause| {
            println!("   removed {:?} ({})", key.as_deref(), cause);
            let mut causes = sink.lock().expect("listener lock");
            *causes.entry(cause.to_string()).or_insert(0) += 1;
        })
        .build()
        .expect("valid configuration");

    println!("Layout: {}\n", cache.layout().name());

    println!("1. Filling a cache of three entries with five keys");
    for (key, value) in [("apple", 1), ("banana", 2), ("cherry", 3)] {
        cache.put(key, value);
    }
    for _ in 0..3 {
        cache.get("apple");
        cache.get("banana");
    }
    cache.put("date", 4);
    cache.put("elderberry", 5);
    cache.clean_up();

    println!("\n2. Loading through the cache");
    let loaded = cache
        .get_or_load("fig", |_| Ok::<_, BoxError>(6))
        .expect("load succeeds");
    println!("   fig = {}", loaded);
    let failed = cache.get_or_load("grape", |_| Err::<u32, BoxError>("no such fruit".into()));
    println!("   grape failed: {}", failed.is_err());

    println!("\n3. Replacing and invalidating");
    cache.put("apple", 10);
    cache.invalidate("banana");

    println!("\n4. Letting everything expire");
    ticker.advance(Duration::from_secs(31));
    cache.clean_up();

    let stats = cache.stats();
    println!("\nCounters:");
    for (name, value) in stats.to_btreemap() {
        println!("   {:<22} {:>10.3}", name, value);
    }
    println!("   {:<22} {:>10.3}", "hit_rate", stats.hit_rate());
    println!(
        "   {:<22} {:?}",
        "average_load_penalty",
        stats.average_load_penalty()
    );

    println!("\nRemoval causes:");
    for (cause, count) in causes.lock().expect("listener lock").iter() {
        println!("   {:<10} {}", cause, count);
    }
    println!("\nRemaining entries: {}", cache.estimated_size());
}
