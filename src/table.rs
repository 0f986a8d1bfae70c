//! Sharded concurrent hash table
//!
//! The table maps keys to [`Node`]s. It is split into a power-of-two number of
//! shards selected by the high bits of the key hash; each shard owns a bucket
//! array selected by the low bits.
//!
//! ```text
//!   hash ──┬── high bits ──▶ shard ─┬─ lock: Mutex<()>       (writers only)
//!          │                         └─ buckets: ArcSwap<[ArcSwapOption<Link>]>
//!          └── low bits  ──▶ slot  ──▶ Link ─▶ Link ─▶ Link ─▶ None
//! ```
//!
//! Chains are immutable once published. A writer takes the shard lock, builds
//! a new chain (prepending on insert, copying the prefix on removal) and swaps
//! the slot head atomically. Readers never lock: they observe the chain either
//! before or after a write, never a torn one. Growing the shard publishes a
//! fresh bucket array the same way.
//!
//! The table does not know about eviction queues or the frequency sketch. The
//! caller reports every structural change to the maintenance layer.

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;

use crate::node::{KeyRef, Node, ValueRef};

const MIN_SLOTS: usize = 4;

struct Link<K, V> {
    node: Arc<Node<K, V>>,
    next: Option<Arc<Link<K, V>>>,
}

type Chain<K, V> = Option<Arc<Link<K, V>>>;

struct Buckets<K, V> {
    slots: Box<[ArcSwapOption<Link<K, V>>]>,
}

impl<K, V> Buckets<K, V> {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    fn slot(&self, hash: u64) -> &ArcSwapOption<Link<K, V>> {
        &self.slots[(hash as usize) & (self.slots.len() - 1)]
    }
}

struct Shard<K, V> {
    lock: Mutex<()>,
    buckets: ArcSwap<Buckets<K, V>>,
    len: AtomicUsize,
}

impl<K, V> Shard<K, V> {
    fn new(slots: usize) -> Self {
        Self {
            lock: Mutex::new(()),
            buckets: ArcSwap::from_pointee(Buckets::new(slots)),
            len: AtomicUsize::new(0),
        }
    }

    /// Prepends a node to its chain. The shard lock must be held.
    fn link(&self, node: Arc<Node<K, V>>) {
        let buckets = self.buckets.load();
        let slot = buckets.slot(node.hash());
        let head = slot.load_full();
        slot.store(Some(Arc::new(Link { node, next: head })));

        let len = self.len.fetch_add(1, Ordering::AcqRel) + 1;
        if len > buckets.slots.len() / 4 * 3 {
            self.grow(&buckets);
        }
    }

    /// Removes a node from its chain. The shard lock must be held.
    fn unlink(&self, node: &Arc<Node<K, V>>) -> bool {
        let buckets = self.buckets.load();
        let slot = buckets.slot(node.hash());
        let head = slot.load_full();
        match without(&head, node) {
            Some(chain) => {
                slot.store(chain);
                self.len.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Publishes a bucket array twice the size. The shard lock must be held.
    fn grow(&self, current: &Buckets<K, V>) {
        let resized = Buckets::new(current.slots.len() * 2);
        for slot in current.slots.iter() {
            let chain = slot.load_full();
            let mut link = chain.as_ref();
            while let Some(l) = link {
                let target = resized.slot(l.node.hash());
                let head = target.load_full();
                target.store(Some(Arc::new(Link {
                    node: Arc::clone(&l.node),
                    next: head,
                })));
                link = l.next.as_ref();
            }
        }
        self.buckets.store(Arc::new(resized));
    }
}

/// Returns the chain without `target`, or `None` if the chain does not hold it.
fn without<K, V>(head: &Chain<K, V>, target: &Arc<Node<K, V>>) -> Option<Chain<K, V>> {
    let mut prefix = Vec::new();
    let mut link = head.as_ref();
    while let Some(l) = link {
        if Arc::ptr_eq(&l.node, target) {
            let mut rest = l.next.clone();
            for node in prefix.into_iter().rev() {
                rest = Some(Arc::new(Link { node, next: rest }));
            }
            return Some(rest);
        }
        prefix.push(Arc::clone(&l.node));
        link = l.next.as_ref();
    }
    None
}

fn find<K, V, Q>(head: &Chain<K, V>, hash: u64, key: &Q) -> Option<Arc<Node<K, V>>>
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    let mut link = head.as_ref();
    while let Some(l) = link {
        if l.node.hash() == hash && l.node.key_matches(key) {
            return Some(Arc::clone(&l.node));
        }
        link = l.next.as_ref();
    }
    None
}

/// Result of a write that stored a value.
pub(crate) enum Write<K, V> {
    /// A new node was linked into the table.
    Inserted(Arc<Node<K, V>>),
    /// An existing node had its value replaced in place.
    Updated {
        node: Arc<Node<K, V>>,
        old_value: Option<Arc<V>>,
        old_weight: u32,
        old_write_time: u64,
        old_access_time: u64,
    },
}

#[cfg(test)]
impl<K, V> Write<K, V> {
    pub(crate) fn node(&self) -> &Arc<Node<K, V>> {
        match self {
            Write::Inserted(node) | Write::Updated { node, .. } => node,
        }
    }
}

/// Result of [`Table::compute_if_absent`].
pub(crate) enum Computed<K, V, T> {
    /// A usable mapping already existed; holds what `usable` extracted from it.
    Present(T),
    /// The value was computed and stored.
    Written(Write<K, V>),
}

/// Position of the reclamation sweep across calls.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SweepCursor {
    shard: usize,
    slot: usize,
}

/// Sharded hash index over cache nodes.
pub(crate) struct Table<K, V, S> {
    shards: Box<[Shard<K, V>]>,
    shard_bits: u32,
    weak_keys: bool,
    hash_builder: S,
}

impl<K, V, S> Table<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates a table with at least `shards` shards, rounded up to a power of two.
    pub(crate) fn new(shards: usize, initial_capacity: usize, weak_keys: bool, hash_builder: S) -> Self {
        let count = shards.max(1).next_power_of_two();
        let slots = (initial_capacity / count).max(MIN_SLOTS).next_power_of_two();
        Self {
            shards: (0..count).map(|_| Shard::new(slots)).collect(),
            shard_bits: count.trailing_zeros(),
            weak_keys,
            hash_builder,
        }
    }

    pub(crate) fn hash<Q>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        self.hash_builder.hash_one(key)
    }

    fn shard(&self, hash: u64) -> &Shard<K, V> {
        if self.shard_bits == 0 {
            return &self.shards[0];
        }
        &self.shards[(hash >> (64 - self.shard_bits)) as usize]
    }

    /// Looks up the live node mapped to `key` without locking.
    pub(crate) fn get<Q>(&self, key: &Q, hash: u64) -> Option<Arc<Node<K, V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let buckets = self.shard(hash).buckets.load();
        let chain = buckets.slot(hash).load();
        find::<K, V, Q>(&chain, hash, key).filter(|node| node.is_alive())
    }

    fn new_node(&self, key: Arc<K>, hash: u64, value: ValueRef<V>, weight: u32, now: u64) -> Arc<Node<K, V>> {
        Arc::new(Node::new(KeyRef::new(key, self.weak_keys), hash, value, weight, now))
    }

    /// Replaces the value of a node in place. The shard lock must be held.
    fn update(node: Arc<Node<K, V>>, value: ValueRef<V>, weight: u32, now: u64) -> Write<K, V> {
        let old_value = node.value();
        let old_weight = node.weight();
        let old_write_time = node.write_time();
        let old_access_time = node.access_time();
        node.set_value(value);
        node.set_weight(weight);
        node.set_write_time(now);
        node.set_access_time(now);
        Write::Updated {
            node,
            old_value,
            old_weight,
            old_write_time,
            old_access_time,
        }
    }

    /// Maps `key` to `value`, replacing any existing value in place.
    pub(crate) fn put(&self, key: Arc<K>, hash: u64, value: ValueRef<V>, weight: u32, now: u64) -> Write<K, V> {
        let shard = self.shard(hash);
        let _guard = shard.lock.lock();

        let existing = {
            let buckets = shard.buckets.load();
            let chain = buckets.slot(hash).load();
            find::<K, V, K>(&chain, hash, &key)
        };
        match existing {
            Some(node) => Self::update(node, value, weight, now),
            None => {
                let node = self.new_node(key, hash, value, weight, now);
                shard.link(Arc::clone(&node));
                Write::Inserted(node)
            }
        }
    }

    /// Replaces the value of `node` if it is still mapped and was last written
    /// at `written_at`.
    pub(crate) fn update_node(
        &self,
        node: &Arc<Node<K, V>>,
        written_at: u64,
        value: ValueRef<V>,
        weight: u32,
        now: u64,
    ) -> Option<Write<K, V>> {
        let shard = self.shard(node.hash());
        let _guard = shard.lock.lock();
        if !node.is_alive() || node.write_time() != written_at {
            return None;
        }
        Some(Self::update(Arc::clone(node), value, weight, now))
    }

    /// Returns what `usable` extracts from the existing mapping for `key`, or
    /// computes and stores a value while holding the shard lock when there is
    /// no mapping or `usable` rejects it.
    ///
    /// `compute` must not access this table.
    pub(crate) fn compute_if_absent<T, E>(
        &self,
        key: Arc<K>,
        hash: u64,
        now: impl FnOnce() -> u64,
        usable: impl FnOnce(&Arc<Node<K, V>>) -> Option<T>,
        compute: impl FnOnce() -> Result<(ValueRef<V>, u32), E>,
    ) -> Result<Computed<K, V, T>, E> {
        let shard = self.shard(hash);
        let _guard = shard.lock.lock();

        let existing = {
            let buckets = shard.buckets.load();
            let chain = buckets.slot(hash).load();
            find::<K, V, K>(&chain, hash, &key)
        };
        if let Some(present) = existing.as_ref().and_then(usable) {
            return Ok(Computed::Present(present));
        }

        let (value, weight) = compute()?;
        let now = now();
        let write = match existing {
            Some(node) => Self::update(node, value, weight, now),
            None => {
                let node = self.new_node(key, hash, value, weight, now);
                shard.link(Arc::clone(&node));
                Write::Inserted(node)
            }
        };
        Ok(Computed::Written(write))
    }

    /// Unmaps `key` and retires its node.
    pub(crate) fn remove<Q>(&self, key: &Q, hash: u64) -> Option<Arc<Node<K, V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let shard = self.shard(hash);
        let _guard = shard.lock.lock();

        let node = {
            let buckets = shard.buckets.load();
            let chain = buckets.slot(hash).load();
            find::<K, V, Q>(&chain, hash, key)?
        };
        shard.unlink(&node);
        node.retire();
        Some(node)
    }

    /// Unmaps `node` if it is still the mapping for its key. Returns true if
    /// this call retired it.
    pub(crate) fn remove_node(&self, node: &Arc<Node<K, V>>) -> bool {
        self.remove_node_if(node, |_| true)
    }

    /// Like [`remove_node`](Self::remove_node), but only if `condition` holds
    /// for the node while its shard is locked, so no write can slip in between.
    pub(crate) fn remove_node_if(&self, node: &Arc<Node<K, V>>, condition: impl FnOnce(&Node<K, V>) -> bool) -> bool {
        let shard = self.shard(node.hash());
        let _guard = shard.lock.lock();
        if !node.is_alive() || !condition(node) {
            return false;
        }
        shard.unlink(node) && node.retire()
    }

    /// Unmaps every entry and returns the retired nodes.
    pub(crate) fn drain(&self) -> Vec<Arc<Node<K, V>>> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            let _guard = shard.lock.lock();
            let buckets = shard.buckets.load();
            for slot in buckets.slots.iter() {
                let chain = slot.swap(None);
                let mut link = chain.as_ref();
                while let Some(l) = link {
                    if l.node.retire() {
                        drained.push(Arc::clone(&l.node));
                    }
                    link = l.next.as_ref();
                }
            }
            shard.len.store(0, Ordering::Release);
        }
        drained
    }

    /// Visits up to `budget` slots starting at `cursor` and removes entries
    /// whose key or value was reclaimed.
    pub(crate) fn sweep(&self, cursor: &mut SweepCursor, budget: usize) -> Vec<Arc<Node<K, V>>> {
        let mut candidates = Vec::new();
        for _ in 0..budget {
            let shard = &self.shards[cursor.shard % self.shards.len()];
            let buckets = shard.buckets.load();
            if cursor.slot >= buckets.slots.len() {
                cursor.shard = (cursor.shard + 1) % self.shards.len();
                cursor.slot = 0;
                continue;
            }
            let guard = buckets.slots[cursor.slot].load();
            let chain: &Chain<K, V> = &guard;
            let mut link = chain.as_ref();
            while let Some(l) = link {
                if l.node.is_alive() && l.node.is_reclaimed() {
                    candidates.push(Arc::clone(&l.node));
                }
                link = l.next.as_ref();
            }
            cursor.slot += 1;
        }

        candidates.retain(|node| self.remove_node(node));
        candidates
    }

    /// Visits every mapped node without locking. Concurrent writes may or may
    /// not be observed.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&Arc<Node<K, V>>)) {
        for shard in self.shards.iter() {
            let buckets = shard.buckets.load();
            for slot in buckets.slots.iter() {
                let guard = slot.load();
                let chain: &Chain<K, V> = &guard;
                let mut link = chain.as_ref();
                while let Some(l) = link {
                    f(&l.node);
                    link = l.next.as_ref();
                }
            }
        }
    }

    /// Number of mapped entries.
    pub(crate) fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.len.load(Ordering::Acquire))
            .sum()
    }

    /// Total number of slots across all shards.
    pub(crate) fn capacity(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.buckets.load().slots.len())
            .sum()
    }
}

impl<K, V, S> fmt::Debug for Table<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("shards", &self.shards.len())
            .field("weak_keys", &self.weak_keys)
            .finish()
    }
}
