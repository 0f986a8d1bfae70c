//! Trace Replay
//!
//! Replays synthetic workloads against caches of different sizes and prints
//! hit rates. A Zipf-like workload shows the frequency-aware admission at
//! work; a looping scan shows it resisting cache pollution.
//!
//! Run with: cargo run --example trace_replay

use wtinylfu::simulation::{replay, ReplayStats};
use wtinylfu::{AccessEvent, Cache};

const REQUESTS: usize = 200_000;

fn main() {
    println!("Trace Replay");
    println!("============\n");

    let skewed = skewed_trace(REQUESTS, 10_000);
    let scan = scan_trace(REQUESTS, 1_200);

    println!("{:<16} {:>8} {:>10} {:>10}", "workload", "maximum", "hit rate", "penalty");
    for maximum in [100, 500, 1_000, 5_000] {
        print_row("skewed", maximum, &run(maximum, &skewed));
    }
    for maximum in [500, 1_000] {
        print_row("looping scan", maximum, &run(maximum, &scan));
    }

    println!("\nWeighted events:");
    let weighted: Vec<AccessEvent> = skewed
        .iter()
        .map(|event| AccessEvent::for_key_and_weight(event.key(), (event.key() % 8 + 1) as u32))
        .collect();
    for maximum in [1_000, 5_000] {
        print_row("skewed, weighted", maximum, &run(maximum, &weighted));
    }
}

fn run(maximum: u64, events: &[AccessEvent]) -> ReplayStats {
    let cache: Cache<i64, AccessEvent> = Cache::builder()
        .maximum_weight(maximum)
        .weigher(|_key, event: &AccessEvent| event.weight())
        .build()
        .expect("valid configuration");
    replay(&cache, events.iter().copied())
}

fn print_row(workload: &str, maximum: u64, stats: &ReplayStats) {
    println!(
        "{:<16} {:>8} {:>9.2}% {:>10.0}",
        workload,
        maximum,
        stats.hit_rate() * 100.0,
        stats.total_penalty()
    );
}

/// Keys drawn with probability roughly proportional to 1/rank, with a miss
/// costing ten times a hit.
fn skewed_trace(requests: usize, keys: u64) -> Vec<AccessEvent> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let harmonic: f64 = (1..=keys).map(|rank| 1.0 / rank as f64).sum();
    (0..requests)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let mut target = (state >> 11) as f64 / (1_u64 << 53) as f64 * harmonic;
            let mut rank = 1;
            while rank < keys {
                target -= 1.0 / rank as f64;
                if target <= 0.0 {
                    break;
                }
                rank += 1;
            }
            AccessEvent::for_key_and_penalties(rank as i64, 1.0, 10.0)
                .expect("miss penalty is at least the hit penalty")
        })
        .collect()
}

/// The same keys requested in a loop slightly larger than the cache.
fn scan_trace(requests: usize, loop_length: i64) -> Vec<AccessEvent> {
    (0..requests as i64)
        .map(|i| AccessEvent::for_key(i % loop_length))
        .collect()
}
