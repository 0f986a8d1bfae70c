//! Cache Configuration
//!
//! A cache is described by two layers:
//!
//! - [`ConfigDescriptor`]: the plain, `Copy` projection of every feature flag and
//!   bound. It is what the [composition engine](crate::compose) inspects to
//!   decide which components a cache needs.
//! - [`CacheConfig`]: the descriptor plus the user supplied callbacks (weigher,
//!   loader, removal listener, ticker, executor) that cannot be copied or
//!   compared.
//!
//! Both are produced by [`CacheBuilder`](crate::CacheBuilder) and are immutable
//! once the cache is built.
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | key strength | strong |
//! | value strength | strong |
//! | maximum | unbounded |
//! | expiration / refresh | disabled |
//! | statistics | disabled |
//! | window ratio | 0.01 of the maximum |
//! | protected ratio | 0.80 of the main region |
//! | shards | available parallelism, clamped to 4..=64 |

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BoxError;
use crate::notification::RemovalListener;
use crate::ticker::{SystemTicker, Ticker};

/// Default share of the maximum given to the admission window.
pub const DEFAULT_WINDOW_RATIO: f64 = 0.01;

/// Default share of the main region given to the protected segment.
pub const DEFAULT_PROTECTED_RATIO: f64 = 0.80;

/// Returns the default number of table shards based on available parallelism.
pub(crate) fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|p: std::num::NonZeroUsize| p.get())
        .unwrap_or(16)
        .clamp(4, 64)
}

/// How keys are referenced by the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum KeyStrength {
    /// Keys are held strongly.
    #[default]
    Strong,
    /// Keys are held weakly and entries disappear once no caller holds the key.
    Weak,
}

/// How values are referenced by the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ValueStrength {
    /// Values are held strongly.
    #[default]
    Strong,
    /// Values are held weakly and entries disappear once no caller holds the value.
    Weak,
    /// Values are held strongly until the cache is asked to release soft references.
    Soft,
}

/// The bound that triggers size eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Maximum {
    /// At most this many entries.
    Size(u64),
    /// At most this total weight, as computed by the weigher.
    Weight(u64),
}

impl Maximum {
    /// The numeric bound.
    pub fn value(self) -> u64 {
        match self {
            Maximum::Size(n) | Maximum::Weight(n) => n,
        }
    }

    /// True if the bound counts weight rather than entries.
    pub fn is_weighted(self) -> bool {
        matches!(self, Maximum::Weight(_))
    }
}

/// Computes the weight of an entry.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync>;

/// Computes the value for a key, used by refresh.
pub type Loader<K, V> = Arc<dyn Fn(&K) -> Result<V, BoxError> + Send + Sync>;

/// Runs background work such as asynchronous refreshes.
pub type Executor = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// Feature flags and bounds of a cache, free of user callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigDescriptor {
    /// Key reference strength.
    pub key_strength: KeyStrength,
    /// Value reference strength.
    pub value_strength: ValueStrength,
    /// Expire entries this long after their last read or write.
    pub expire_after_access: Option<Duration>,
    /// Expire entries this long after their last write.
    pub expire_after_write: Option<Duration>,
    /// Reload entries on read once they are this old.
    pub refresh_after_write: Option<Duration>,
    /// Maximum number of entries.
    pub maximum_size: Option<u64>,
    /// Maximum total weight.
    pub maximum_weight: Option<u64>,
    /// Whether a custom weigher was supplied.
    pub has_weigher: bool,
    /// Whether a loader was supplied.
    pub has_loader: bool,
    /// Whether a removal listener was supplied.
    pub has_removal_listener: bool,
    /// Whether statistics are recorded.
    pub stats_enabled: bool,
    /// Whether refreshes run on the executor instead of the calling thread.
    pub async_loading: bool,
    /// Share of the maximum given to the admission window.
    pub window_ratio: f64,
    /// Share of the main region given to the protected segment.
    pub protected_ratio: f64,
    /// Number of table shards, rounded up to a power of two.
    pub shards: usize,
    /// Expected number of entries, used to presize the table.
    pub initial_capacity: usize,
}

impl ConfigDescriptor {
    /// The effective maximum, if exactly one bound was requested.
    pub fn maximum(&self) -> Option<Maximum> {
        match (self.maximum_size, self.maximum_weight) {
            (Some(size), None) => Some(Maximum::Size(size)),
            (None, Some(weight)) => Some(Maximum::Weight(weight)),
            _ => None,
        }
    }

    /// True if any expiration mode is enabled.
    pub fn expires(&self) -> bool {
        self.expire_after_access.is_some() || self.expire_after_write.is_some()
    }

    /// True if entries can disappear through reference reclamation.
    pub fn collects(&self) -> bool {
        self.key_strength == KeyStrength::Weak || self.value_strength != ValueStrength::Strong
    }
}

impl Default for ConfigDescriptor {
    fn default() -> Self {
        Self {
            key_strength: KeyStrength::Strong,
            value_strength: ValueStrength::Strong,
            expire_after_access: None,
            expire_after_write: None,
            refresh_after_write: None,
            maximum_size: None,
            maximum_weight: None,
            has_weigher: false,
            has_loader: false,
            has_removal_listener: false,
            stats_enabled: false,
            async_loading: false,
            window_ratio: DEFAULT_WINDOW_RATIO,
            protected_ratio: DEFAULT_PROTECTED_RATIO,
            shards: default_shard_count(),
            initial_capacity: 0,
        }
    }
}

/// Complete configuration of a cache.
pub struct CacheConfig<K, V> {
    pub(crate) descriptor: ConfigDescriptor,
    pub(crate) weigher: Option<Weigher<K, V>>,
    pub(crate) loader: Option<Loader<K, V>>,
    pub(crate) removal_listener: Option<RemovalListener<K, V>>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) executor: Option<Executor>,
}

impl<K, V> CacheConfig<K, V> {
    /// Creates a configuration with every feature disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: ConfigDescriptor::default(),
            weigher: None,
            loader: None,
            removal_listener: None,
            ticker: Arc::new(SystemTicker::new()),
            executor: None,
        }
    }

    /// Returns the feature flags of this configuration.
    #[inline]
    pub fn descriptor(&self) -> &ConfigDescriptor {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut ConfigDescriptor {
        &mut self.descriptor
    }
}

impl<K, V> Default for CacheConfig<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for CacheConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            weigher: self.weigher.clone(),
            loader: self.loader.clone(),
            removal_listener: self.removal_listener.clone(),
            ticker: Arc::clone(&self.ticker),
            executor: self.executor.clone(),
        }
    }
}

impl<K, V> fmt::Debug for CacheConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("descriptor", &self.descriptor)
            .field("weigher", &self.weigher.is_some())
            .field("loader", &self.loader.is_some())
            .field("removal_listener", &self.removal_listener.is_some())
            .field("executor", &self.executor.is_some())
            .finish()
    }
}
