//! Trace events
//!
//! An [`AccessEvent`] is one request from a recorded workload: the key that was
//! asked for, the weight of the value, and optionally what a hit and a miss
//! cost. Events are fed into a cache by [`simulation::replay`](crate::simulation::replay).

use core::fmt;
use core::hash::{Hash, Hasher};

use crate::error::EventError;

/// A single access from a trace.
#[derive(Clone, Copy)]
pub struct AccessEvent {
    key: i64,
    weight: u32,
    hit_penalty: f64,
    miss_penalty: f64,
    penalty_aware: bool,
}

impl AccessEvent {
    /// An access to `key` with weight 1 and no penalties.
    pub fn for_key(key: i64) -> Self {
        Self {
            key,
            weight: 1,
            hit_penalty: 0.0,
            miss_penalty: 0.0,
            penalty_aware: false,
        }
    }

    /// An access to `key` whose value weighs `weight`.
    pub fn for_key_and_weight(key: i64, weight: u32) -> Self {
        Self {
            weight,
            ..Self::for_key(key)
        }
    }

    /// An access to `key` with the cost of a hit and of a miss.
    ///
    /// The hit penalty must be non-negative and the miss penalty at least the
    /// hit penalty.
    pub fn for_key_and_penalties(key: i64, hit_penalty: f64, miss_penalty: f64) -> Result<Self, EventError> {
        if hit_penalty.is_nan() || hit_penalty < 0.0 {
            return Err(EventError::NegativeHitPenalty(hit_penalty));
        }
        if miss_penalty.is_nan() || miss_penalty < hit_penalty {
            return Err(EventError::MissBelowHit {
                hit: hit_penalty,
                miss: miss_penalty,
            });
        }
        Ok(Self {
            hit_penalty: positive_zero(hit_penalty),
            miss_penalty: positive_zero(miss_penalty),
            penalty_aware: true,
            ..Self::for_key(key)
        })
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn hit_penalty(&self) -> f64 {
        self.hit_penalty
    }

    pub fn miss_penalty(&self) -> f64 {
        self.miss_penalty
    }

    /// True if the event was built with explicit penalties.
    pub fn is_penalty_aware(&self) -> bool {
        self.penalty_aware
    }

    /// Extra cost paid on a miss compared to a hit.
    pub fn delta(&self) -> f64 {
        self.miss_penalty - self.hit_penalty
    }
}

/// Maps `-0.0` to `0.0` so that equal penalties also have equal bits.
fn positive_zero(penalty: f64) -> f64 {
    if penalty == 0.0 {
        0.0
    } else {
        penalty
    }
}

impl PartialEq for AccessEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.weight == other.weight
            && self.hit_penalty.to_bits() == other.hit_penalty.to_bits()
            && self.miss_penalty.to_bits() == other.miss_penalty.to_bits()
    }
}

impl Eq for AccessEvent {}

impl Hash for AccessEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.weight.hash(state);
        self.hit_penalty.to_bits().hash(state);
        self.miss_penalty.to_bits().hash(state);
    }
}

impl fmt::Debug for AccessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("AccessEvent");
        d.field("key", &self.key).field("weight", &self.weight);
        if self.penalty_aware {
            d.field("hit_penalty", &self.hit_penalty)
                .field("miss_penalty", &self.miss_penalty);
        }
        d.finish()
    }
}
