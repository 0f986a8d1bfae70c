//! Cache façade
//!
//! [`Cache`] is a cheap, cloneable handle to a concurrent cache; every clone
//! shares the same entries. It is configured and created through
//! [`CacheBuilder`].
//!
//! # Examples
//!
//! ```
//! use wtinylfu::Cache;
//!
//! let cache: Cache<String, u64> = Cache::builder()
//!     .maximum_size(10_000)
//!     .record_stats()
//!     .build()
//!     .unwrap();
//!
//! cache.put("answer".to_string(), 42);
//! assert_eq!(cache.get("answer").as_deref(), Some(&42));
//! assert_eq!(cache.stats().hit_count, 1);
//! ```
//!
//! Loading through a closure:
//!
//! ```
//! use wtinylfu::{BoxError, Cache};
//!
//! let cache: Cache<u32, String> = Cache::builder().maximum_size(100).build().unwrap();
//! let value = cache
//!     .get_or_load(7, |key| Ok::<_, BoxError>(format!("value-{key}")))
//!     .unwrap();
//! assert_eq!(*value, "value-7");
//! ```

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

use crate::compose::{self, CacheLayout};
use crate::config::{CacheConfig, ConfigDescriptor, KeyStrength, ValueStrength};
use crate::error::{BoxError, ConfigError, LoadError};
use crate::local::LocalCache;
use crate::notification::RemovalCause;
use crate::policy::PolicySnapshot;
use crate::stats::CacheStats;
use crate::ticker::Ticker;

/// Builds a [`Cache`].
///
/// Every setting is optional. Conflicting settings are reported by
/// [`build`](CacheBuilder::build) as a [`ConfigError`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use wtinylfu::Cache;
///
/// let cache: Cache<u64, Vec<u8>> = Cache::builder()
///     .maximum_weight(64 * 1024 * 1024)
///     .weigher(|_key, value: &Vec<u8>| value.len() as u32)
///     .expire_after_write(Duration::from_secs(300))
///     .build()
///     .unwrap();
/// assert_eq!(cache.layout().name(), "SSMWW");
/// ```
pub struct CacheBuilder<K, V> {
    config: CacheConfig<K, V>,
}

impl<K, V> CacheBuilder<K, V> {
    /// Creates a builder for an unbounded cache with no optional features.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CacheConfig::new(),
        }
    }

    /// Bounds the cache to `size` entries.
    #[must_use]
    pub fn maximum_size(mut self, size: u64) -> Self {
        self.config.descriptor_mut().maximum_size = Some(size);
        self
    }

    /// Bounds the total weight of the cache. Requires a [`weigher`](Self::weigher).
    #[must_use]
    pub fn maximum_weight(mut self, weight: u64) -> Self {
        self.config.descriptor_mut().maximum_weight = Some(weight);
        self
    }

    /// Sets the function that computes entry weights.
    #[must_use]
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u32 + Send + Sync + 'static) -> Self {
        self.config.descriptor_mut().has_weigher = true;
        self.config.weigher = Some(Arc::new(weigher));
        self
    }

    /// Expires entries once `duration` has passed since their last read or write.
    #[must_use]
    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        self.config.descriptor_mut().expire_after_access = Some(duration);
        self
    }

    /// Expires entries once `duration` has passed since their last write.
    #[must_use]
    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        self.config.descriptor_mut().expire_after_write = Some(duration);
        self
    }

    /// Reloads an entry with the [`loader`](Self::loader) when it is read
    /// `duration` or more after its last write. The stale value is returned
    /// to the reader that triggered the reload.
    #[must_use]
    pub fn refresh_after_write(mut self, duration: Duration) -> Self {
        self.config.descriptor_mut().refresh_after_write = Some(duration);
        self
    }

    /// Holds keys weakly. An entry disappears once no caller holds its key,
    /// so keys should be inserted with [`Cache::put_shared`].
    #[must_use]
    pub fn weak_keys(mut self) -> Self {
        self.config.descriptor_mut().key_strength = KeyStrength::Weak;
        self
    }

    /// Holds values weakly. An entry disappears once no caller holds its value.
    #[must_use]
    pub fn weak_values(mut self) -> Self {
        self.config.descriptor_mut().value_strength = ValueStrength::Weak;
        self
    }

    /// Holds values strongly until [`Cache::release_soft_references`] is called.
    #[must_use]
    pub fn soft_values(mut self) -> Self {
        self.config.descriptor_mut().value_strength = ValueStrength::Soft;
        self
    }

    /// Enables hit, miss, load and eviction counters.
    #[must_use]
    pub fn record_stats(mut self) -> Self {
        self.config.descriptor_mut().stats_enabled = true;
        self
    }

    /// Runs refreshes on the [`executor`](Self::executor) instead of the
    /// reading thread.
    #[must_use]
    pub fn async_loading(mut self) -> Self {
        self.config.descriptor_mut().async_loading = true;
        self
    }

    /// Sets the function used to reload entries.
    #[must_use]
    pub fn loader(mut self, loader: impl Fn(&K) -> Result<V, BoxError> + Send + Sync + 'static) -> Self {
        self.config.descriptor_mut().has_loader = true;
        self.config.loader = Some(Arc::new(loader));
        self
    }

    /// Sets where asynchronous refreshes run. Defaults to a new thread per refresh.
    #[must_use]
    pub fn executor(mut self, executor: impl Fn(Box<dyn FnOnce() + Send>) + Send + Sync + 'static) -> Self {
        self.config.executor = Some(Arc::new(executor));
        self
    }

    /// Sets the callback invoked for every removed entry.
    #[must_use]
    pub fn removal_listener(
        mut self,
        listener: impl Fn(Option<Arc<K>>, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.config.descriptor_mut().has_removal_listener = true;
        self.config.removal_listener = Some(Arc::new(listener));
        self
    }

    /// Sets the time source used for expiration and refresh.
    #[must_use]
    pub fn ticker(mut self, ticker: impl Ticker + 'static) -> Self {
        self.config.ticker = Arc::new(ticker);
        self
    }

    /// Presizes the table for `capacity` entries.
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.descriptor_mut().initial_capacity = capacity;
        self
    }

    /// Sets the number of table shards (rounded up to a power of two).
    #[must_use]
    pub fn shards(mut self, shards: usize) -> Self {
        self.config.descriptor_mut().shards = shards;
        self
    }

    /// Sets the share of the maximum given to the admission window.
    #[must_use]
    pub fn window_ratio(mut self, ratio: f64) -> Self {
        self.config.descriptor_mut().window_ratio = ratio;
        self
    }

    /// Sets the share of the main region given to the protected segment.
    #[must_use]
    pub fn protected_ratio(mut self, ratio: f64) -> Self {
        self.config.descriptor_mut().protected_ratio = ratio;
        self
    }

    /// The feature flags configured so far.
    pub fn descriptor(&self) -> &ConfigDescriptor {
        self.config.descriptor()
    }

    /// Builds the cache with the default hasher.
    pub fn build(self) -> Result<Cache<K, V>, ConfigError>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.build_with_hasher(DefaultHashBuilder::default())
    }

    /// Builds the cache with a custom hasher.
    pub fn build_with_hasher<S>(self, hash_builder: S) -> Result<Cache<K, V, S>, ConfigError>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Send + Sync + 'static,
        S: BuildHasher + Send + Sync + 'static,
    {
        let layout = compose::synthesize(self.config.descriptor())?;
        Ok(Cache {
            inner: Arc::new(LocalCache::new(self.config, layout, hash_builder)),
        })
    }
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for CacheBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("config", &self.config)
            .finish()
    }
}

/// A concurrent cache with Window TinyLFU admission.
///
/// Reads are lock-free. Values are returned as `Arc<V>`, so they stay valid
/// after the entry is evicted.
pub struct Cache<K, V, S = DefaultHashBuilder> {
    inner: Arc<LocalCache<K, V, S>>,
}

impl<K, V> Cache<K, V, DefaultHashBuilder> {
    /// Starts configuring a new cache.
    #[must_use]
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Returns the value for `key`, or `None` if it is absent, expired or reclaimed.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.get(key)
    }

    /// Returns the value for `key`, computing and caching it with `loader`
    /// if absent.
    ///
    /// Concurrent callers for the same key wait for a single load. The loader
    /// runs while a shard lock is held and must not use this cache. A failed
    /// load caches nothing.
    pub fn get_or_load<F, E>(&self, key: K, loader: F) -> Result<Arc<V>, LoadError>
    where
        F: FnOnce(&K) -> Result<V, E>,
        E: Into<BoxError>,
    {
        self.inner.get_or_load(key, loader)
    }

    /// Maps `key` to `value`, replacing any previous value.
    pub fn put(&self, key: K, value: V) {
        self.inner.put(Arc::new(key), Arc::new(value));
    }

    /// Like [`put`](Self::put), for callers that keep their own references,
    /// as weak keys and weak values require.
    pub fn put_shared(&self, key: Arc<K>, value: Arc<V>) {
        self.inner.put(key, value);
    }

    /// Removes the entry for `key`.
    pub fn invalidate<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.invalidate(key);
    }

    /// Removes every entry.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Number of mapped entries, including ones that are expired or reclaimed
    /// but not yet cleaned up.
    pub fn estimated_size(&self) -> u64 {
        self.inner.estimated_size()
    }

    /// Total weight of the entries after applying pending work, or `None`
    /// when the cache is unbounded.
    pub fn weighted_size(&self) -> Option<u64> {
        self.inner.weighted_size()
    }

    /// A snapshot of the counters. All zero unless statistics are enabled.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Applies pending reads and writes, expires and evicts entries, and
    /// drops entries whose references were reclaimed.
    pub fn clean_up(&self) {
        self.inner.clean_up();
    }

    /// Lets soft values be reclaimed once no caller holds them.
    pub fn release_soft_references(&self) {
        self.inner.release_soft_references();
    }

    /// Segment membership of each key, eldest first.
    pub fn policy_snapshot(&self) -> PolicySnapshot<K> {
        self.inner.policy_snapshot()
    }

    /// The layout composed for this cache's configuration.
    pub fn layout(&self) -> &CacheLayout {
        self.inner.layout()
    }

    #[cfg(test)]
    pub(crate) fn local(&self) -> &LocalCache<K, V, S> {
        &self.inner
    }
}

impl<K, V, S> Clone for Cache<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> fmt::Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("inner", &self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::FakeTicker;
    use parking_lot::Mutex;

    fn bounded(size: u64) -> Cache<u64, u64> {
        Cache::builder().maximum_size(size).build().unwrap()
    }

    #[test]
    fn test_put_get() {
        let cache = bounded(10);
        cache.put(1, 10);
        assert_eq!(cache.get(&1).as_deref(), Some(&10));
        assert!(cache.get(&2).is_none());
        assert_eq!(cache.estimated_size(), 1);
    }

    #[test]
    fn test_borrowed_lookup() {
        let cache: Cache<String, u32> = Cache::builder().build().unwrap();
        cache.put("key".to_string(), 1);
        assert_eq!(cache.get("key").as_deref(), Some(&1));
        cache.invalidate("key");
        assert!(cache.get("key").is_none());
    }

    #[test]
    fn test_replace_notifies() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&causes);
        let cache: Cache<u64, u64> = Cache::builder()
            .maximum_size(10)
            .removal_listener(move |key, value, cause| {
                sink.lock().push((key.map(|k| *k), value.map(|v| *v), cause));
            })
            .build()
            .unwrap();

        cache.put(1, 1);
        cache.put(1, 2);
        cache.invalidate(&1);
        assert_eq!(
            *causes.lock(),
            vec![
                (Some(1), Some(1), RemovalCause::Replaced),
                (Some(1), Some(2), RemovalCause::Explicit),
            ]
        );
    }

    #[test]
    fn test_unbounded_cache_has_no_policy() {
        let cache: Cache<u64, u64> = Cache::builder().build().unwrap();
        assert_eq!(cache.layout().name(), "SS");
        for i in 0..100 {
            cache.put(i, i);
        }
        assert_eq!(cache.estimated_size(), 100);
        assert_eq!(cache.weighted_size(), None);
        assert!(cache.policy_snapshot().window.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let result: Result<Cache<u64, u64>, _> = Cache::builder()
            .maximum_size(10)
            .maximum_weight(10)
            .weigher(|_, _| 1)
            .build();
        assert_eq!(result.err(), Some(ConfigError::SizeAndWeight));
    }

    #[test]
    fn test_expire_after_access_extends_lifetime() {
        let ticker = FakeTicker::new();
        let cache: Cache<u64, u64> = Cache::builder()
            .expire_after_access(Duration::from_secs(10))
            .ticker(ticker.clone())
            .build()
            .unwrap();

        cache.put(1, 1);
        ticker.advance(Duration::from_secs(6));
        assert!(cache.get(&1).is_some());
        ticker.advance(Duration::from_secs(6));
        assert!(cache.get(&1).is_some(), "Read at 6s should extend the deadline");
        ticker.advance(Duration::from_secs(10));
        assert!(cache.get(&1).is_none());
        cache.clean_up();
        assert_eq!(cache.estimated_size(), 0);
    }

    #[test]
    fn test_clone_shares_entries() {
        let cache = bounded(10);
        let other = cache.clone();
        cache.put(1, 1);
        assert_eq!(other.get(&1).as_deref(), Some(&1));
    }
}
