//! Error types
//!
//! Every fallible operation in the crate reports one of the enums below.
//! Configuration problems surface once, when a cache is built; loader failures
//! surface on the `get_or_load` call that ran the loader; malformed trace events
//! surface when the event is constructed.

use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error type returned by user supplied loaders.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A configuration that cannot be turned into a cache.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Both a maximum entry count and a maximum weight were requested.
    #[error("maximum size and maximum weight cannot be combined")]
    SizeAndWeight,

    /// A weigher was supplied but the cache is bounded by entry count (or unbounded).
    #[error("a weigher requires a maximum weight")]
    WeigherWithoutWeight,

    /// A maximum weight was requested without a weigher to compute entry weights.
    #[error("a maximum weight requires a weigher")]
    WeightWithoutWeigher,

    /// Weak or soft values cannot be combined with asynchronous loading.
    #[error("weak or soft values are not supported with asynchronous loading")]
    ReclaimableValuesWithAsyncLoading,

    /// Refresh after write needs a loader to compute the replacement value.
    #[error("refresh after write requires a loader")]
    RefreshWithoutLoader,

    /// Asynchronous loading was requested without a loader.
    #[error("asynchronous loading requires a loader")]
    AsyncLoadingWithoutLoader,

    /// A window or protected ratio outside of `0.0..=1.0`.
    #[error("{name} must be within 0.0..=1.0, got {value}")]
    InvalidRatio {
        /// Name of the offending setting.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The table must have at least one shard.
    #[error("shard count must be greater than zero")]
    ZeroShards,
}

/// A loader failed to produce a value.
///
/// Nothing is inserted into the cache when this is returned.
#[derive(Debug, Clone, thiserror::Error)]
#[error("loader failed: {source}")]
pub struct LoadError {
    #[source]
    source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl LoadError {
    pub(crate) fn new(source: BoxError) -> Self {
        Self {
            source: Arc::from(source),
        }
    }

    /// Returns the error reported by the loader.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }
}

/// An [`AccessEvent`](crate::event::AccessEvent) built from invalid arguments.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventError {
    /// A hit penalty below zero (or NaN).
    #[error("hit penalty must be non-negative, got {0}")]
    NegativeHitPenalty(f64),

    /// A miss penalty smaller than the hit penalty (or NaN).
    #[error("miss penalty {miss} must be at least the hit penalty {hit}")]
    MissBelowHit {
        /// The hit penalty of the rejected event.
        hit: f64,
        /// The miss penalty of the rejected event.
        miss: f64,
    },
}
