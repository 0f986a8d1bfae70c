//! Cache entries
//!
//! A [`Node`] is created by the table on insertion and shared, through `Arc`,
//! between the table's hash chains, the eviction queues and the timer wheel.
//! Fields fall into two groups:
//!
//! - **Data** (`value`, `weight`, timestamps): written by client threads under
//!   the owning shard lock, read lock-free by anyone.
//! - **Policy** (`policy_weight`, `queue`, links, `deadline`): touched only by
//!   the thread holding the maintenance lock.
//!
//! Liveness moves one way: `Alive → Retired → Dead`. A node is reachable from
//! the table iff it is alive. Removing an entry retires it under the shard lock;
//! maintenance marks it dead once it is unlinked from every policy structure.

use core::borrow::Borrow;
use core::fmt;
use core::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use crate::config::ValueStrength;
use crate::list::Entry;

/// Queue membership of a node inside the eviction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Admission window for recently inserted entries.
    Window,
    /// Main region entries that have not been hit since entering it.
    Probation,
    /// Main region entries hit at least once while on probation.
    Protected,
    /// Not linked into any queue.
    None,
}

impl QueueType {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => QueueType::Window,
            1 => QueueType::Probation,
            2 => QueueType::Protected,
            _ => QueueType::None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            QueueType::Window => 0,
            QueueType::Probation => 1,
            QueueType::Protected => 2,
            QueueType::None => 3,
        }
    }
}

const ALIVE: u8 = 0;
const RETIRED: u8 = 1;
const DEAD: u8 = 2;

/// Sentinel for a node that is not scheduled in the timer wheel.
pub(crate) const NO_TIMER: u32 = u32::MAX;

/// Key reference held by a node.
pub(crate) enum KeyRef<K> {
    Strong(Arc<K>),
    Weak(Weak<K>),
}

impl<K> KeyRef<K> {
    pub(crate) fn new(key: Arc<K>, weak: bool) -> Self {
        if weak {
            KeyRef::Weak(Arc::downgrade(&key))
        } else {
            KeyRef::Strong(key)
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<K>> {
        match self {
            KeyRef::Strong(key) => Some(Arc::clone(key)),
            KeyRef::Weak(key) => key.upgrade(),
        }
    }

    pub(crate) fn is_reclaimed(&self) -> bool {
        match self {
            KeyRef::Strong(_) => false,
            KeyRef::Weak(key) => key.strong_count() == 0,
        }
    }
}

/// Value reference held by a node.
///
/// `Soft` holds the value strongly until [`Node::release_soft`] demotes it to
/// `Weak`.
pub(crate) enum ValueRef<V> {
    Strong(Arc<V>),
    Weak(Weak<V>),
    Soft(Arc<V>),
}

impl<V> ValueRef<V> {
    pub(crate) fn new(value: Arc<V>, strength: ValueStrength) -> Self {
        match strength {
            ValueStrength::Strong => ValueRef::Strong(value),
            ValueStrength::Weak => ValueRef::Weak(Arc::downgrade(&value)),
            ValueStrength::Soft => ValueRef::Soft(value),
        }
    }

    fn upgrade(&self) -> Option<Arc<V>> {
        match self {
            ValueRef::Strong(value) | ValueRef::Soft(value) => Some(Arc::clone(value)),
            ValueRef::Weak(value) => value.upgrade(),
        }
    }

    fn is_reclaimed(&self) -> bool {
        match self {
            ValueRef::Strong(_) | ValueRef::Soft(_) => false,
            ValueRef::Weak(value) => value.strong_count() == 0,
        }
    }
}

/// One cache slot.
pub(crate) struct Node<K, V> {
    key: KeyRef<K>,
    hash: u64,
    value: ArcSwap<ValueRef<V>>,
    weight: AtomicU32,
    access_time: AtomicU64,
    write_time: AtomicU64,
    state: AtomicU8,

    policy_weight: AtomicU32,
    queue: AtomicU8,
    access_link: AtomicPtr<Entry<Arc<Node<K, V>>>>,
    timer_link: AtomicPtr<Entry<Arc<Node<K, V>>>>,
    timer_bucket: AtomicU32,
    deadline: AtomicU64,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: KeyRef<K>, hash: u64, value: ValueRef<V>, weight: u32, now: u64) -> Self {
        Self {
            key,
            hash,
            value: ArcSwap::from_pointee(value),
            weight: AtomicU32::new(weight),
            access_time: AtomicU64::new(now),
            write_time: AtomicU64::new(now),
            state: AtomicU8::new(ALIVE),
            policy_weight: AtomicU32::new(0),
            queue: AtomicU8::new(QueueType::None.as_u8()),
            access_link: AtomicPtr::new(ptr::null_mut()),
            timer_link: AtomicPtr::new(ptr::null_mut()),
            timer_bucket: AtomicU32::new(NO_TIMER),
            deadline: AtomicU64::new(0),
        }
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    /// Returns the key, or `None` if a weakly held key was reclaimed.
    pub(crate) fn key(&self) -> Option<Arc<K>> {
        self.key.upgrade()
    }

    pub(crate) fn key_matches<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        match &self.key {
            KeyRef::Strong(k) => (**k).borrow() == key,
            KeyRef::Weak(k) => k.upgrade().is_some_and(|k| (*k).borrow() == key),
        }
    }

    /// Returns the value, or `None` if a weakly held value was reclaimed.
    pub(crate) fn value(&self) -> Option<Arc<V>> {
        self.value.load().upgrade()
    }

    pub(crate) fn set_value(&self, value: ValueRef<V>) {
        self.value.store(Arc::new(value));
    }

    /// True when the key or value has been garbage collected.
    pub(crate) fn is_reclaimed(&self) -> bool {
        self.key.is_reclaimed() || self.value.load().is_reclaimed()
    }

    /// Demotes a soft value to a weak one. Returns true if the value changed.
    pub(crate) fn release_soft(&self) -> bool {
        let current = self.value.load_full();
        if let ValueRef::Soft(value) = &*current {
            let weak = Arc::new(ValueRef::Weak(Arc::downgrade(value)));
            let previous = self.value.compare_and_swap(&current, weak);
            return Arc::ptr_eq(&*previous, &current);
        }
        false
    }

    pub(crate) fn weight(&self) -> u32 {
        self.weight.load(Ordering::Acquire)
    }

    pub(crate) fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Release);
    }

    pub(crate) fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_access_time(&self, now: u64) {
        self.access_time.store(now, Ordering::Relaxed);
    }

    pub(crate) fn write_time(&self) -> u64 {
        self.write_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_write_time(&self, now: u64) {
        self.write_time.store(now, Ordering::Relaxed);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.load(Ordering::Acquire) == ALIVE
    }

    #[cfg(test)]
    pub(crate) fn is_retired(&self) -> bool {
        self.state.load(Ordering::Acquire) == RETIRED
    }

    #[cfg(test)]
    pub(crate) fn is_dead(&self) -> bool {
        self.state.load(Ordering::Acquire) == DEAD
    }

    /// Moves an alive node to retired. Returns false if it already left the alive state.
    pub(crate) fn retire(&self) -> bool {
        self.state
            .compare_exchange(ALIVE, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn die(&self) {
        self.state.store(DEAD, Ordering::Release);
    }

    pub(crate) fn policy_weight(&self) -> u32 {
        self.policy_weight.load(Ordering::Relaxed)
    }

    pub(crate) fn set_policy_weight(&self, weight: u32) {
        self.policy_weight.store(weight, Ordering::Relaxed);
    }

    pub(crate) fn queue(&self) -> QueueType {
        QueueType::from_u8(self.queue.load(Ordering::Relaxed))
    }

    pub(crate) fn set_queue(&self, queue: QueueType) {
        self.queue.store(queue.as_u8(), Ordering::Relaxed);
    }

    pub(crate) fn access_link(&self) -> *mut Entry<Arc<Node<K, V>>> {
        self.access_link.load(Ordering::Relaxed)
    }

    pub(crate) fn set_access_link(&self, link: *mut Entry<Arc<Node<K, V>>>) {
        self.access_link.store(link, Ordering::Relaxed);
    }

    pub(crate) fn timer_link(&self) -> *mut Entry<Arc<Node<K, V>>> {
        self.timer_link.load(Ordering::Relaxed)
    }

    pub(crate) fn set_timer_link(&self, link: *mut Entry<Arc<Node<K, V>>>) {
        self.timer_link.store(link, Ordering::Relaxed);
    }

    /// Packed `(level << 16) | index` of the timer bucket, or [`NO_TIMER`].
    pub(crate) fn timer_bucket(&self) -> u32 {
        self.timer_bucket.load(Ordering::Relaxed)
    }

    pub(crate) fn set_timer_bucket(&self, bucket: u32) {
        self.timer_bucket.store(bucket, Ordering::Relaxed);
    }

    pub(crate) fn deadline(&self) -> u64 {
        self.deadline.load(Ordering::Relaxed)
    }

    pub(crate) fn set_deadline(&self, deadline: u64) {
        self.deadline.store(deadline, Ordering::Relaxed);
    }
}

impl<K, V> fmt::Debug for Node<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("hash", &self.hash)
            .field("weight", &self.weight())
            .field("queue", &self.queue())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: u32, value: &'static str) -> Node<u32, &'static str> {
        Node::new(
            KeyRef::new(Arc::new(key), false),
            u64::from(key),
            ValueRef::new(Arc::new(value), ValueStrength::Strong),
            1,
            0,
        )
    }

    #[test]
    fn test_liveness_transitions() {
        let node = node(1, "one");
        assert!(node.is_alive());
        assert!(node.retire());
        assert!(node.is_retired());
        // Retiring twice fails
        assert!(!node.retire());
        node.die();
        assert!(node.is_dead());
        assert!(!node.retire());
    }

    #[test]
    fn test_key_matching() {
        let node = node(7, "seven");
        assert!(node.key_matches(&7));
        assert!(!node.key_matches(&8));
        assert_eq!(node.key().as_deref(), Some(&7));
    }

    #[test]
    fn test_weak_key_reclaimed() {
        let key = Arc::new(String::from("k"));
        let node: Node<String, u32> = Node::new(
            KeyRef::new(Arc::clone(&key), true),
            1,
            ValueRef::new(Arc::new(1), ValueStrength::Strong),
            1,
            0,
        );
        assert!(node.key_matches(&String::from("k")));
        assert!(!node.is_reclaimed());
        drop(key);
        assert!(node.is_reclaimed());
        assert!(node.key().is_none());
        assert!(!node.key_matches(&String::from("k")));
    }

    #[test]
    fn test_soft_value_release() {
        let value = Arc::new(5_u64);
        let node: Node<u32, u64> = Node::new(
            KeyRef::new(Arc::new(1), false),
            1,
            ValueRef::new(Arc::clone(&value), ValueStrength::Soft),
            1,
            0,
        );
        assert!(node.release_soft());
        // Already weak
        assert!(!node.release_soft());
        assert_eq!(node.value().as_deref(), Some(&5));
        drop(value);
        assert!(node.value().is_none());
        assert!(node.is_reclaimed());
    }

    #[test]
    fn test_queue_tag_round_trip() {
        let node = node(1, "one");
        assert_eq!(node.queue(), QueueType::None);
        for queue in [QueueType::Window, QueueType::Probation, QueueType::Protected] {
            node.set_queue(queue);
            assert_eq!(node.queue(), queue);
        }
    }
}
