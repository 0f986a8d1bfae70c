//! Cache runtime
//!
//! [`LocalCache`] wires the pieces together. Data lives in the [`Table`] and is
//! read without locks. Everything that orders entries (queues, sketch, timer
//! wheel) lives behind one maintenance lock and learns about client activity
//! through the read and write buffers.
//!
//! ```text
//!   get ──▶ Table::get ──▶ ReadBuffer ─────┐
//!                                          │  try_lock
//!   put ──▶ Table::put ──▶ WriteBuffer ────┼───────────▶ maintenance pass
//!                                          │             1. drain reads
//!   invalidate ──▶ Table::remove ──────────┘             2. drain writes
//!                                                        3. sweep reclaimed
//!                                                        4. expire
//!                                                        5. evict
//!                                                        ── unlock ──
//!                                                        6. notify listener
//! ```
//!
//! There is no background thread. Whichever client thread wins the `try_lock`
//! runs the pass inline. A writer that finds the write buffer full blocks on
//! the lock instead, so writes are never lost.
//!
//! Components are allocated from the [`CacheLayout`]: a cache without buffers
//! (unbounded, no expiration, strong references) touches nothing but the table.

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "hashbrown")]
use hashbrown::HashSet;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::{default_stripes, DrainStatus, Offer, ReadBuffer, Status, WriteBuffer, WriteTask};
use crate::compose::{CacheLayout, Capability};
use crate::config::{CacheConfig, Executor, KeyStrength, Loader, Maximum, ValueStrength, Weigher};
use crate::error::{BoxError, LoadError};
use crate::node::{Node, ValueRef};
use crate::notification::{self, Notification, RemovalCause, RemovalListener};
use crate::policy::{nanos, EvictionEngine, Expiry, PolicySnapshot};
use crate::stats::{CacheStats, StatsCounter};
use crate::table::{Computed, SweepCursor, Table, Write};
use crate::ticker::Ticker;

/// Table slots inspected for reclaimed references per maintenance pass.
const SWEEP_BUDGET: usize = 64;

/// State guarded by the maintenance lock.
struct Maintenance<K, V> {
    policy: EvictionEngine<K, V>,
    cursor: SweepCursor,
}

struct Buffers<K, V> {
    reads: ReadBuffer<Arc<Node<K, V>>>,
    writes: WriteBuffer<WriteTask<K, V>>,
    status: DrainStatus,
    maintenance: Mutex<Maintenance<K, V>>,
}

struct Refresher<K, V> {
    after_write: u64,
    loader: Loader<K, V>,
    executor: Option<Executor>,
    in_flight: Mutex<HashSet<usize>>,
}

/// Why a value could not be stored by `get_or_load`.
enum LoadFailure<V> {
    Loader(BoxError),
    Rejected(Arc<V>, u32),
}

fn spawn_executor() -> Executor {
    Arc::new(|task: Box<dyn FnOnce() + Send>| {
        std::thread::spawn(task);
    })
}

pub(crate) struct LocalCache<K, V, S> {
    table: Table<K, V, S>,
    layout: CacheLayout,
    value_strength: ValueStrength,
    maximum: Option<Maximum>,
    expiry: Expiry,
    ticker: Arc<dyn Ticker>,
    weigher: Option<Weigher<K, V>>,
    buffers: Option<Buffers<K, V>>,
    refresher: Option<Refresher<K, V>>,
    stats: Option<StatsCounter>,
    listener: Option<RemovalListener<K, V>>,
}

impl<K, V, S> LocalCache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Allocates the components named by `layout`.
    pub(crate) fn new(config: CacheConfig<K, V>, layout: CacheLayout, hash_builder: S) -> Self {
        let CacheConfig {
            descriptor,
            weigher,
            loader,
            removal_listener,
            ticker,
            executor,
        } = config;

        let expiry = if layout.has(Capability::Expires) {
            Expiry::new(descriptor.expire_after_access, descriptor.expire_after_write)
        } else {
            Expiry::default()
        };
        let maximum = descriptor
            .maximum()
            .filter(|_| layout.has(Capability::Evicts));

        let buffers = layout.has(Capability::Buffers).then(|| {
            let stripes = default_stripes();
            let policy = EvictionEngine::new(
                maximum.map(Maximum::value),
                maximum.is_some_and(Maximum::is_weighted),
                descriptor.window_ratio,
                descriptor.protected_ratio,
                expiry,
                ticker.read(),
            );
            Buffers {
                reads: ReadBuffer::new(stripes),
                writes: WriteBuffer::new(stripes),
                status: DrainStatus::new(),
                maintenance: Mutex::new(Maintenance {
                    policy,
                    cursor: SweepCursor::default(),
                }),
            }
        });

        let refresher = match (descriptor.refresh_after_write, loader) {
            (Some(after_write), Some(loader)) if layout.has(Capability::Refreshes) => {
                let executor = descriptor
                    .async_loading
                    .then(|| executor.unwrap_or_else(spawn_executor));
                Some(Refresher {
                    after_write: nanos(after_write),
                    loader,
                    executor,
                    in_flight: Mutex::new(HashSet::new()),
                })
            }
            _ => None,
        };

        Self {
            table: Table::new(
                descriptor.shards,
                descriptor.initial_capacity,
                descriptor.key_strength == KeyStrength::Weak,
                hash_builder,
            ),
            value_strength: descriptor.value_strength,
            maximum,
            expiry,
            ticker,
            weigher: weigher.filter(|_| layout.has(Capability::Weighs)),
            buffers,
            refresher,
            stats: layout
                .has(Capability::RecordsStats)
                .then(StatsCounter::default),
            listener: removal_listener.filter(|_| layout.has(Capability::Notifies)),
            layout,
        }
    }

    fn now(&self) -> u64 {
        self.ticker.read()
    }

    fn weigh(&self, key: &K, value: &V) -> u32 {
        self.weigher.as_ref().map_or(1, |weigher| weigher(key, value))
    }

    /// True if an entry of this weight can never fit.
    fn exceeds_maximum(&self, weight: u32) -> bool {
        matches!(self.maximum, Some(Maximum::Weight(maximum)) if u64::from(weight) > maximum)
    }

    fn collects(&self) -> bool {
        self.layout.has(Capability::WeakKeys) || self.layout.has(Capability::ReclaimableValues)
    }

    pub(crate) fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    // ---- Reads ----

    pub(crate) fn get<Q>(self: &Arc<Self>, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.table.hash(key);
        let value = self.table.get(key, hash).and_then(|node| self.read(&node));
        self.record_lookup(value.is_some());
        value
    }

    /// Returns the value of a mapped node if it is still usable and records
    /// the access. Expired and reclaimed entries read as absent.
    fn read(self: &Arc<Self>, node: &Arc<Node<K, V>>) -> Option<Arc<V>> {
        let now = self.now();
        if self.expiry.has_expired(node, now) {
            self.schedule_maintenance();
            return None;
        }
        let Some(value) = node.value() else {
            self.remove_collected(node);
            return None;
        };
        if self.expiry.after_access().is_some() {
            node.set_access_time(now);
        }
        self.after_read(node);
        self.refresh_if_needed(node, now);
        Some(value)
    }

    fn record_lookup(&self, hit: bool) {
        if let Some(stats) = &self.stats {
            if hit {
                stats.record_hits(1);
            } else {
                stats.record_misses(1);
            }
        }
    }

    fn after_read(&self, node: &Arc<Node<K, V>>) {
        let Some(buffers) = &self.buffers else {
            return;
        };
        let delayable = buffers.reads.offer(Arc::clone(node)) == Offer::Success;
        if buffers.status.should_drain(delayable) {
            self.try_maintenance(buffers);
        }
    }

    /// Returns the cached value for `key`, computing it with `loader` when absent.
    pub(crate) fn get_or_load<F, E>(self: &Arc<Self>, key: K, loader: F) -> Result<Arc<V>, LoadError>
    where
        F: FnOnce(&K) -> Result<V, E>,
        E: Into<BoxError>,
    {
        let hash = self.table.hash(&key);
        if let Some(value) = self.table.get(&key, hash).and_then(|node| self.read(&node)) {
            self.record_lookup(true);
            return Ok(value);
        }

        let key = Arc::new(key);
        let started = self.now();
        // Kept here so that a weakly held value survives until it is returned
        let mut loaded = None;
        let result = self.table.compute_if_absent(
            Arc::clone(&key),
            hash,
            || self.now(),
            |node| {
                node.value()
                    .filter(|_| !self.expiry.has_expired(node, started))
                    .map(|value| (Arc::clone(node), value))
            },
            || {
                let value = loader(&*key).map_err(|err| LoadFailure::Loader(err.into()))?;
                let value = Arc::new(value);
                let weight = self.weigh(&key, &value);
                if self.exceeds_maximum(weight) {
                    return Err(LoadFailure::Rejected(value, weight));
                }
                loaded = Some(Arc::clone(&value));
                Ok((ValueRef::new(value, self.value_strength), weight))
            },
        );
        let elapsed = Duration::from_nanos(self.now().saturating_sub(started));

        match result {
            Ok(Computed::Present((node, value))) => {
                // Another caller stored the value while this one waited on the lock
                if self.expiry.after_access().is_some() {
                    node.set_access_time(self.now());
                }
                self.after_read(&node);
                self.record_lookup(true);
                Ok(value)
            }
            Ok(Computed::Written(write)) => {
                self.record_lookup(false);
                if let Some(stats) = &self.stats {
                    stats.record_load_success(elapsed);
                }
                self.after_store(write, started);
                loaded.ok_or_else(|| LoadError::new("loader produced no value".into()))
            }
            Err(LoadFailure::Rejected(value, weight)) => {
                self.record_lookup(false);
                if let Some(stats) = &self.stats {
                    stats.record_load_success(elapsed);
                }
                self.reject(&key, hash, weight);
                Ok(value)
            }
            Err(LoadFailure::Loader(err)) => {
                self.record_lookup(false);
                if let Some(stats) = &self.stats {
                    stats.record_load_failure(elapsed);
                }
                debug!(error = %err, "loader failed");
                Err(LoadError::new(err))
            }
        }
    }

    // ---- Refresh ----

    fn refresh_if_needed(self: &Arc<Self>, node: &Arc<Node<K, V>>, now: u64) {
        let Some(refresher) = &self.refresher else {
            return;
        };
        if now.saturating_sub(node.write_time()) < refresher.after_write {
            return;
        }
        let Some(key) = node.key() else {
            return;
        };
        let id = Arc::as_ptr(node) as usize;
        if !refresher.in_flight.lock().insert(id) {
            return;
        }

        let written_at = node.write_time();
        let cache = Arc::clone(self);
        let node = Arc::clone(node);
        let task = move || {
            cache.complete_refresh(&node, &key, written_at);
            if let Some(refresher) = &cache.refresher {
                refresher.in_flight.lock().remove(&id);
            }
        };
        match &refresher.executor {
            Some(executor) => executor(Box::new(task)),
            None => task(),
        }
    }

    /// Reloads `key` and stores the result if the entry was not written since
    /// `written_at`.
    fn complete_refresh(&self, node: &Arc<Node<K, V>>, key: &Arc<K>, written_at: u64) {
        let Some(refresher) = &self.refresher else {
            return;
        };
        let started = self.now();
        let loaded = (refresher.loader)(key);
        let elapsed = Duration::from_nanos(self.now().saturating_sub(started));

        let value = match loaded {
            Ok(value) => {
                if let Some(stats) = &self.stats {
                    stats.record_load_success(elapsed);
                }
                Arc::new(value)
            }
            Err(err) => {
                if let Some(stats) = &self.stats {
                    stats.record_load_failure(elapsed);
                }
                debug!(error = %err, "refresh failed");
                return;
            }
        };

        if node.write_time() != written_at {
            return;
        }
        let weight = self.weigh(key, &value);
        if self.exceeds_maximum(weight) {
            self.reject(key, node.hash(), weight);
            return;
        }
        let now = self.now();
        if let Some(write) = self
            .table
            .update_node(node, written_at, ValueRef::new(value, self.value_strength), weight, now)
        {
            self.after_store(write, now);
        }
    }

    // ---- Writes ----

    pub(crate) fn put(&self, key: Arc<K>, value: Arc<V>) {
        let hash = self.table.hash(&*key);
        let weight = self.weigh(&key, &value);
        if self.exceeds_maximum(weight) {
            self.reject(&key, hash, weight);
            return;
        }
        let now = self.now();
        let write = self
            .table
            .put(key, hash, ValueRef::new(value, self.value_strength), weight, now);
        self.after_store(write, now);
    }

    /// Reports a stored value: a new node to the policy, a replaced one to the
    /// listener as well.
    fn after_store(&self, write: Write<K, V>, now: u64) {
        match write {
            Write::Inserted(node) => self.after_write(WriteTask::Add(node)),
            Write::Updated {
                node,
                old_value,
                old_weight,
                old_write_time,
                old_access_time,
            } => {
                let cause = if old_value.is_none() {
                    RemovalCause::Collected
                } else if self.expiry.expired_at(old_access_time, old_write_time, now) {
                    RemovalCause::Expired
                } else {
                    RemovalCause::Replaced
                };
                let mut removed = Vec::new();
                self.record_removal(node.key(), old_value, old_weight, cause, &mut removed);
                self.after_write(WriteTask::Update(node));
                self.notify(removed);
            }
        }
    }

    /// Drops an entry that is heavier than the maximum and unmaps whatever the
    /// key held before.
    fn reject(&self, key: &K, hash: u64, weight: u32) {
        debug!(weight, maximum = ?self.maximum, "entry exceeds the maximum weight and was not cached");
        if let Some(node) = self.table.remove(key, hash) {
            let mut removed = Vec::new();
            self.record_removal(node.key(), node.value(), node.weight(), RemovalCause::Size, &mut removed);
            self.after_write(WriteTask::Remove(node));
            self.notify(removed);
        }
    }

    pub(crate) fn invalidate<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.table.hash(key);
        let Some(node) = self.table.remove(key, hash) else {
            return;
        };
        let mut removed = Vec::new();
        let cause = self.cause_of(&node, self.now(), RemovalCause::Explicit);
        self.record_removal(node.key(), node.value(), node.weight(), cause, &mut removed);
        self.after_write(WriteTask::Remove(node));
        self.notify(removed);
    }

    pub(crate) fn invalidate_all(&self) {
        let now = self.now();
        let mut removed = Vec::new();
        match &self.buffers {
            Some(buffers) => {
                let mut maintenance = buffers.maintenance.lock();
                removed = self.maintain(buffers, &mut maintenance, false);
                for node in self.table.drain() {
                    maintenance.policy.on_remove(&node);
                    node.die();
                    let cause = self.cause_of(&node, now, RemovalCause::Explicit);
                    self.record_removal(node.key(), node.value(), node.weight(), cause, &mut removed);
                }
            }
            None => {
                for node in self.table.drain() {
                    node.die();
                    let cause = self.cause_of(&node, now, RemovalCause::Explicit);
                    self.record_removal(node.key(), node.value(), node.weight(), cause, &mut removed);
                }
            }
        }
        self.notify(removed);
    }

    /// Unmaps a node found with a reclaimed value during a read.
    fn remove_collected(&self, node: &Arc<Node<K, V>>) {
        if self.table.remove_node(node) {
            let mut removed = Vec::new();
            self.record_removal(node.key(), None, node.weight(), RemovalCause::Collected, &mut removed);
            self.after_write(WriteTask::Remove(Arc::clone(node)));
            self.notify(removed);
        }
    }

    fn after_write(&self, task: WriteTask<K, V>) {
        let Some(buffers) = &self.buffers else {
            if let WriteTask::Remove(node) = task {
                node.die();
            }
            return;
        };

        let mut task = task;
        while let Err(rejected) = buffers.writes.offer(task) {
            task = rejected;
            let removed = {
                let mut maintenance = buffers.maintenance.lock();
                self.maintain(buffers, &mut maintenance, false)
            };
            self.notify(removed);
        }
        buffers.status.mark_required();
        self.try_maintenance(buffers);
    }

    // ---- Removal bookkeeping ----

    /// The cause to report for a removed node: collection and expiration take
    /// precedence over `otherwise`.
    fn cause_of(&self, node: &Node<K, V>, now: u64, otherwise: RemovalCause) -> RemovalCause {
        if node.is_reclaimed() {
            RemovalCause::Collected
        } else if self.expiry.has_expired(node, now) {
            RemovalCause::Expired
        } else {
            otherwise
        }
    }

    fn record_removal(
        &self,
        key: Option<Arc<K>>,
        value: Option<Arc<V>>,
        weight: u32,
        cause: RemovalCause,
        removed: &mut Vec<Notification<K, V>>,
    ) {
        if cause.was_evicted() {
            if let Some(stats) = &self.stats {
                stats.record_eviction(weight);
            }
        }
        if self.listener.is_some() {
            removed.push(Notification::new(key, value, cause));
        }
    }

    fn notify(&self, removed: Vec<Notification<K, V>>) {
        if removed.is_empty() {
            return;
        }
        if let Some(listener) = &self.listener {
            notification::dispatch(listener, removed);
        }
    }

    // ---- Maintenance ----

    fn schedule_maintenance(&self) {
        if let Some(buffers) = &self.buffers {
            buffers.status.mark_required();
            self.try_maintenance(buffers);
        }
    }

    fn try_maintenance(&self, buffers: &Buffers<K, V>) {
        let removed = match buffers.maintenance.try_lock() {
            Some(mut maintenance) => self.maintain(buffers, &mut maintenance, false),
            None => return,
        };
        self.notify(removed);
    }

    /// Runs a pass while holding the maintenance lock (blocking), then `f`.
    fn with_maintenance<R>(&self, f: impl FnOnce(&mut Maintenance<K, V>) -> R) -> Option<R> {
        let buffers = self.buffers.as_ref()?;
        let (result, removed) = {
            let mut maintenance = buffers.maintenance.lock();
            let removed = self.maintain(buffers, &mut maintenance, false);
            (f(&mut maintenance), removed)
        };
        self.notify(removed);
        Some(result)
    }

    /// One maintenance pass. Returns the notifications to deliver once the
    /// lock is released.
    fn maintain(
        &self,
        buffers: &Buffers<K, V>,
        maintenance: &mut Maintenance<K, V>,
        full_sweep: bool,
    ) -> Vec<Notification<K, V>> {
        buffers.status.set(Status::ProcessingToIdle);
        let mut removed = Vec::new();
        let policy = &mut maintenance.policy;

        let reads = buffers.reads.drain(|node| policy.on_access(&node));

        let mut writes = 0;
        while writes < buffers.writes.capacity() {
            let Some(task) = buffers.writes.poll() else {
                break;
            };
            match task {
                WriteTask::Add(node) => policy.on_add(&node),
                WriteTask::Update(node) => policy.on_update(&node),
                WriteTask::Remove(node) => {
                    policy.on_remove(&node);
                    node.die();
                }
            }
            writes += 1;
        }

        let mut collected = 0;
        if self.collects() {
            let budget = if full_sweep {
                self.table.capacity() * 2
            } else {
                SWEEP_BUDGET
            };
            for node in self.table.sweep(&mut maintenance.cursor, budget) {
                policy.on_remove(&node);
                node.die();
                self.record_removal(node.key(), node.value(), node.weight(), RemovalCause::Collected, &mut removed);
                collected += 1;
            }
        }

        let now = self.now();
        let mut expired = 0;
        for node in policy.expire_entries(now) {
            // A write may have revived the entry since it was scheduled
            if self.table.remove_node_if(&node, |node| self.expiry.has_expired(node, now)) {
                policy.on_remove(&node);
                node.die();
                self.record_removal(node.key(), node.value(), node.weight(), RemovalCause::Expired, &mut removed);
                expired += 1;
            } else {
                policy.reschedule(&node);
            }
        }

        let mut evicted = 0;
        for node in policy.evict_entries() {
            if self.table.remove_node(&node) {
                node.die();
                let cause = self.cause_of(&node, now, RemovalCause::Size);
                self.record_removal(node.key(), node.value(), node.weight(), cause, &mut removed);
                evicted += 1;
            }
        }

        if !buffers
            .status
            .compare_and_set(Status::ProcessingToIdle, Status::Idle)
        {
            buffers.status.set(Status::Required);
        }
        trace!(reads, writes, collected, expired, evicted, "maintenance pass");
        removed
    }

    /// Applies all pending work, sweeping the whole table for reclaimed entries.
    pub(crate) fn clean_up(&self) {
        if let Some(buffers) = &self.buffers {
            let removed = {
                let mut maintenance = buffers.maintenance.lock();
                self.maintain(buffers, &mut maintenance, true)
            };
            self.notify(removed);
        }
    }

    /// Demotes every soft value to weak, then drops the entries nobody else holds.
    pub(crate) fn release_soft_references(&self) {
        if self.value_strength != ValueStrength::Soft {
            return;
        }
        let mut released = 0_usize;
        self.table.for_each(|node| {
            if node.release_soft() {
                released += 1;
            }
        });
        debug!(released, "released soft references");
        self.clean_up();
    }

    // ---- Inspection ----

    pub(crate) fn estimated_size(&self) -> u64 {
        self.table.len() as u64
    }

    /// Total weight accounted by the policy, or `None` for an unbounded cache.
    pub(crate) fn weighted_size(&self) -> Option<u64> {
        self.with_maintenance(|maintenance| maintenance.policy.weighted_size())
            .flatten()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats
            .as_ref()
            .map(StatsCounter::snapshot)
            .unwrap_or_default()
    }

    pub(crate) fn policy_snapshot(&self) -> PolicySnapshot<K> {
        self.with_maintenance(|maintenance| maintenance.policy.snapshot())
            .unwrap_or_default()
    }
}

impl<K, V, S> fmt::Debug for LocalCache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("layout", &self.layout.name())
            .field("table", &self.table)
            .field("maximum", &self.maximum)
            .finish()
    }
}
