//! Trace replay
//!
//! Feeds [`AccessEvent`]s into a [`Cache`] the way a client would use it: each
//! event is a lookup, and a miss stores the event under its key. The cached
//! value is the event itself, so a weighted cache can use
//! [`AccessEvent::weight`] as its weigher.
//!
//! ```
//! use wtinylfu::simulation::replay;
//! use wtinylfu::{AccessEvent, Cache};
//!
//! let cache: Cache<i64, AccessEvent> = Cache::builder()
//!     .maximum_weight(100)
//!     .weigher(|_key, event: &AccessEvent| event.weight())
//!     .build()
//!     .unwrap();
//!
//! let trace = [1, 2, 1, 3, 1].map(|key| AccessEvent::for_key_and_weight(key, 10));
//! let stats = replay(&cache, trace);
//! assert_eq!(stats.hits, 2);
//! assert_eq!(stats.misses, 3);
//! ```

use core::hash::BuildHasher;
use core::ops::AddAssign;

use tracing::debug;

use crate::cache::Cache;
use crate::event::AccessEvent;

/// Totals gathered while replaying a trace.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayStats {
    pub hits: u64,
    pub misses: u64,
    /// Sum of the hit penalties of the events that hit.
    pub hit_penalty: f64,
    /// Sum of the miss penalties of the events that missed.
    pub miss_penalty: f64,
}

impl ReplayStats {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of events that hit, or 1.0 for an empty trace.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            1.0
        } else {
            self.hits as f64 / requests as f64
        }
    }

    /// Total cost of the trace.
    pub fn total_penalty(&self) -> f64 {
        self.hit_penalty + self.miss_penalty
    }
}

impl AddAssign for ReplayStats {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.hit_penalty += other.hit_penalty;
        self.miss_penalty += other.miss_penalty;
    }
}

/// Replays `events` against `cache` and returns what was hit and missed.
pub fn replay<S, I>(cache: &Cache<i64, AccessEvent, S>, events: I) -> ReplayStats
where
    S: BuildHasher + Send + Sync + 'static,
    I: IntoIterator<Item = AccessEvent>,
{
    let mut stats = ReplayStats::default();
    for event in events {
        if cache.get(&event.key()).is_some() {
            stats.hits += 1;
            stats.hit_penalty += event.hit_penalty();
        } else {
            stats.misses += 1;
            stats.miss_penalty += event.miss_penalty();
            cache.put(event.key(), event);
        }
    }
    debug!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        "trace replayed"
    );
    stats
}
