//! Window TinyLFU eviction engine
//!
//! The engine owns every structure that orders entries: the three LRU queues,
//! the frequency sketch and the timer wheel. It is driven exclusively by the
//! maintenance pass, which replays buffered reads and writes into it.
//!
//! ```text
//!              ┌──────────────┐  overflow  ┌───────────────────────────────────┐
//!   insert ──▶ │    Window    │ ─────────▶ │ Probation ──hit──▶ Protected      │
//!              │   (≈1%, LRU) │            │     ▲                  │ overflow │
//!              └──────────────┘            │     └────── demote ────┘          │
//!                                          │        main region (≈99%)         │
//!                                          └───────────────────────────────────┘
//! ```
//!
//! ## Admission
//!
//! Entries leave the window in LRU order and land at the probation tail as
//! *candidates*. While the cache is over its maximum, the eldest entry of the
//! main region (the *victim*) is compared with the eldest candidate using the
//! frequency sketch. The candidate is admitted only if it is strictly more
//! popular; on a tie the victim stays, since it already proved itself once.
//!
//! ## Expiration
//!
//! Expiration is independent of admission. Entries with a deadline are linked
//! into the [`TimerWheel`], and due entries are unlinked from every queue no
//! matter which segment they sit in.

use core::fmt;
use core::ptr;
use std::sync::Arc;
use std::time::Duration;

use crate::list::List;
use crate::node::{Node, QueueType};
use crate::sketch::FrequencySketch;
use crate::timer_wheel::TimerWheel;

/// Segment membership at a point in time, eldest first.
#[derive(Debug, Clone)]
pub struct PolicySnapshot<K> {
    /// Keys in the admission window.
    pub window: Vec<Arc<K>>,
    /// Keys on probation in the main region.
    pub probation: Vec<Arc<K>>,
    /// Keys in the protected part of the main region.
    pub protected: Vec<Arc<K>>,
}

impl<K> Default for PolicySnapshot<K> {
    fn default() -> Self {
        Self {
            window: Vec::new(),
            probation: Vec::new(),
            protected: Vec::new(),
        }
    }
}

/// Expiration durations in ticker nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Expiry {
    after_access: Option<u64>,
    after_write: Option<u64>,
}

pub(crate) fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Expiry {
    pub(crate) fn new(after_access: Option<Duration>, after_write: Option<Duration>) -> Self {
        Self {
            after_access: after_access.map(nanos),
            after_write: after_write.map(nanos),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.after_access.is_some() || self.after_write.is_some()
    }

    /// The earliest time at which the node expires.
    pub(crate) fn deadline<K, V>(&self, node: &Node<K, V>) -> Option<u64> {
        self.deadline_at(node.access_time(), node.write_time())
    }

    fn deadline_at(&self, access_time: u64, write_time: u64) -> Option<u64> {
        let access = self.after_access.map(|d| access_time.saturating_add(d));
        let write = self.after_write.map(|d| write_time.saturating_add(d));
        match (access, write) {
            (Some(a), Some(w)) => Some(a.min(w)),
            (a, w) => a.or(w),
        }
    }

    pub(crate) fn has_expired<K, V>(&self, node: &Node<K, V>, now: u64) -> bool {
        self.expired_at(node.access_time(), node.write_time(), now)
    }

    /// Whether an entry with these timestamps is expired at `now`.
    pub(crate) fn expired_at(&self, access_time: u64, write_time: u64, now: u64) -> bool {
        self.deadline_at(access_time, write_time)
            .is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn after_access(&self) -> Option<u64> {
        self.after_access
    }
}

/// Size-bounded segmented LRU with TinyLFU admission.
struct SizePolicy<K, V> {
    window: List<Arc<Node<K, V>>>,
    probation: List<Arc<Node<K, V>>>,
    protected: List<Arc<Node<K, V>>>,
    sketch: FrequencySketch,
    weighted: bool,
    maximum: u64,
    window_maximum: u64,
    protected_maximum: u64,
    weighted_size: u64,
    window_weighted_size: u64,
    protected_weighted_size: u64,
}

impl<K, V> SizePolicy<K, V> {
    fn new(maximum: u64, weighted: bool, window_ratio: f64, protected_ratio: f64) -> Self {
        let main = (maximum as f64 * (1.0 - window_ratio)).floor() as u64;
        let window_maximum = maximum - main.min(maximum);
        let protected_maximum = ((maximum - window_maximum) as f64 * protected_ratio).floor() as u64;
        Self {
            window: List::new(),
            probation: List::new(),
            protected: List::new(),
            sketch: FrequencySketch::new(),
            weighted,
            maximum,
            window_maximum,
            protected_maximum,
            weighted_size: 0,
            window_weighted_size: 0,
            protected_weighted_size: 0,
        }
    }

    fn len(&self) -> usize {
        self.window.len() + self.probation.len() + self.protected.len()
    }

    fn list_mut(&mut self, queue: QueueType) -> Option<&mut List<Arc<Node<K, V>>>> {
        match queue {
            QueueType::Window => Some(&mut self.window),
            QueueType::Probation => Some(&mut self.probation),
            QueueType::Protected => Some(&mut self.protected),
            QueueType::None => None,
        }
    }

    fn add(&mut self, node: &Arc<Node<K, V>>) {
        // Counting starts once the cache is half full, before this entry's weight
        if self.weighted_size >= self.maximum / 2 {
            let capacity = if self.weighted {
                self.len() as u64 + 1
            } else {
                self.maximum
            };
            self.sketch.ensure_capacity(capacity);
        }
        self.sketch.increment(node.hash());

        let weight = u64::from(node.policy_weight());
        self.weighted_size += weight;
        self.window_weighted_size += weight;
        node.set_queue(QueueType::Window);
        let link = self.window.push_back(Arc::clone(node));
        node.set_access_link(link);
    }

    fn unlink(&mut self, node: &Node<K, V>) -> bool {
        let link = node.access_link();
        if link.is_null() {
            return false;
        }
        let queue = node.queue();
        let weight = u64::from(node.policy_weight());
        match queue {
            QueueType::Window => self.window_weighted_size -= weight,
            QueueType::Protected => self.protected_weighted_size -= weight,
            QueueType::Probation | QueueType::None => {}
        }
        self.weighted_size -= weight;

        if let Some(list) = self.list_mut(queue) {
            // SAFETY: a non-null access link always points into the list named by the queue tag
            if let Some(entry) = unsafe { list.remove(link) } {
                drop(entry.into_value());
            }
        }
        node.set_access_link(ptr::null_mut());
        node.set_queue(QueueType::None);
        true
    }

    /// Moves a linked node to the tail of another queue, keeping its link address.
    fn transfer(&mut self, node: &Node<K, V>, to: QueueType) {
        let link = node.access_link();
        let from = node.queue();
        let Some(list) = self.list_mut(from) else {
            return;
        };
        // SAFETY: the link belongs to the list named by the queue tag
        let Some(entry) = (unsafe { list.remove(link) }) else {
            return;
        };
        let raw = Box::into_raw(entry);
        if let Some(target) = self.list_mut(to) {
            // SAFETY: raw was just detached and is not linked anywhere
            unsafe { target.attach_last_from_other_list(raw) };
            node.set_queue(to);
        }
    }

    fn access(&mut self, node: &Node<K, V>) {
        let link = node.access_link();
        if link.is_null() {
            return;
        }
        self.sketch.increment(node.hash());
        match node.queue() {
            // SAFETY: the link belongs to the window list
            QueueType::Window => unsafe { self.window.move_to_back(link) },
            QueueType::Probation => {
                self.transfer(node, QueueType::Protected);
                self.protected_weighted_size += u64::from(node.policy_weight());
                self.demote_from_protected();
            }
            // SAFETY: the link belongs to the protected list
            QueueType::Protected => unsafe { self.protected.move_to_back(link) },
            QueueType::None => {}
        }
    }

    /// Moves the eldest protected entries to probation until protected fits.
    fn demote_from_protected(&mut self) {
        while self.protected_weighted_size > self.protected_maximum {
            let Some(node) = self.protected.front().cloned() else {
                break;
            };
            self.protected_weighted_size -= u64::from(node.policy_weight());
            self.transfer(&node, QueueType::Probation);
        }
    }

    fn update_weight(&mut self, node: &Node<K, V>) {
        let old = u64::from(node.policy_weight());
        let new = u64::from(node.weight());
        node.set_policy_weight(node.weight());
        self.weighted_size = self.weighted_size - old + new;
        match node.queue() {
            QueueType::Window => {
                self.window_weighted_size = self.window_weighted_size - old + new;
            }
            QueueType::Protected => {
                self.protected_weighted_size = self.protected_weighted_size - old + new;
            }
            QueueType::Probation | QueueType::None => {}
        }
    }

    fn admit(&self, candidate: &Node<K, V>, victim: &Node<K, V>) -> bool {
        self.sketch.frequency(candidate.hash()) > self.sketch.frequency(victim.hash())
    }

    /// Whether `candidate` should be evicted in favour of keeping `victim`.
    fn rejects(&self, candidate: &Node<K, V>, victim: &Node<K, V>) -> bool {
        if u64::from(candidate.policy_weight()) > self.maximum {
            return true;
        }
        if u64::from(victim.policy_weight()) > self.maximum {
            return false;
        }
        !self.admit(candidate, victim)
    }

    fn evict(&mut self) -> Vec<Arc<Node<K, V>>> {
        let mut candidates = Vec::new();
        while self.window_weighted_size > self.window_maximum {
            let Some(node) = self.window.front().cloned() else {
                break;
            };
            self.window_weighted_size -= u64::from(node.policy_weight());
            self.transfer(&node, QueueType::Probation);
            candidates.push(node);
        }

        let mut evicted = Vec::new();
        let mut next = 0;
        while self.weighted_size > self.maximum {
            while next < candidates.len() && candidates[next].queue() != QueueType::Probation {
                next += 1;
            }
            let victim = self
                .probation
                .front()
                .or_else(|| self.protected.front())
                .or_else(|| self.window.front())
                .cloned();
            let Some(victim) = victim else {
                break;
            };

            let target = match candidates.get(next) {
                Some(candidate)
                    if !Arc::ptr_eq(candidate, &victim) && self.rejects(candidate, &victim) =>
                {
                    next += 1;
                    Arc::clone(candidate)
                }
                _ => victim,
            };
            self.unlink(&target);
            evicted.push(target);
        }
        evicted
    }
}

/// Orders entries for eviction and expiration.
pub(crate) struct EvictionEngine<K, V> {
    size: Option<SizePolicy<K, V>>,
    expiry: Expiry,
    wheel: Option<TimerWheel<K, V>>,
}

impl<K, V> EvictionEngine<K, V> {
    /// Creates an engine. `maximum` enables size eviction; `weighted` makes it
    /// count entry weights instead of entries.
    pub(crate) fn new(
        maximum: Option<u64>,
        weighted: bool,
        window_ratio: f64,
        protected_ratio: f64,
        expiry: Expiry,
        now: u64,
    ) -> Self {
        Self {
            size: maximum.map(|max| SizePolicy::new(max, weighted, window_ratio, protected_ratio)),
            expiry,
            wheel: expiry.is_enabled().then(|| TimerWheel::new(now)),
        }
    }

    fn schedule(&mut self, node: &Arc<Node<K, V>>) {
        let Some(wheel) = &mut self.wheel else {
            return;
        };
        if let Some(deadline) = self.expiry.deadline(node) {
            node.set_deadline(deadline);
            wheel.schedule(node);
        }
    }

    /// Links a newly inserted node.
    pub(crate) fn on_add(&mut self, node: &Arc<Node<K, V>>) {
        if !node.is_alive() || !node.access_link().is_null() {
            return;
        }
        node.set_policy_weight(node.weight());
        if let Some(size) = &mut self.size {
            size.add(node);
        }
        self.schedule(node);
    }

    /// Records a read of a linked node.
    pub(crate) fn on_access(&mut self, node: &Arc<Node<K, V>>) {
        if !node.is_alive() {
            return;
        }
        if let Some(size) = &mut self.size {
            size.access(node);
        }
        if self.expiry.after_access.is_some() && !node.timer_link().is_null() {
            self.schedule(node);
        }
    }

    /// Applies an in-place value replacement.
    pub(crate) fn on_update(&mut self, node: &Arc<Node<K, V>>) {
        if !node.is_alive() {
            return;
        }
        if let Some(size) = &mut self.size {
            if node.access_link().is_null() {
                return;
            }
            size.update_weight(node);
            size.access(node);
        }
        self.schedule(node);
    }

    /// Unlinks a node from every structure. Safe to call more than once.
    pub(crate) fn on_remove(&mut self, node: &Node<K, V>) {
        if let Some(size) = &mut self.size {
            size.unlink(node);
        }
        if let Some(wheel) = &mut self.wheel {
            wheel.deschedule(node);
        }
    }

    /// Unlinks entries until the cache fits its maximum and returns them.
    pub(crate) fn evict_entries(&mut self) -> Vec<Arc<Node<K, V>>> {
        let Some(size) = &mut self.size else {
            return Vec::new();
        };
        let evicted = size.evict();
        if let Some(wheel) = &mut self.wheel {
            for node in &evicted {
                wheel.deschedule(node);
            }
        }
        evicted
    }

    /// Advances the timer wheel and returns the entries that are due.
    ///
    /// The entries leave the wheel but stay in their access queue. Each one
    /// must then be either removed with [`on_remove`](Self::on_remove) or, if
    /// a write revived it meanwhile, handed back with
    /// [`reschedule`](Self::reschedule).
    pub(crate) fn expire_entries(&mut self, now: u64) -> Vec<Arc<Node<K, V>>> {
        let Some(wheel) = &mut self.wheel else {
            return Vec::new();
        };
        let mut expired = wheel.advance(now);
        expired.retain(|node| match self.expiry.deadline(node) {
            Some(deadline) if deadline > now && node.is_alive() => {
                node.set_deadline(deadline);
                wheel.schedule(node);
                false
            }
            _ => true,
        });
        expired
    }

    /// Puts a node returned by [`expire_entries`](Self::expire_entries) back
    /// on the wheel at its current deadline.
    pub(crate) fn reschedule(&mut self, node: &Arc<Node<K, V>>) {
        if node.is_alive() {
            self.schedule(node);
        }
    }

    /// Total weight of linked entries, if size eviction is enabled.
    pub(crate) fn weighted_size(&self) -> Option<u64> {
        self.size.as_ref().map(|size| size.weighted_size)
    }

    /// Number of linked entries, if size eviction is enabled.
    #[cfg(test)]
    pub(crate) fn linked(&self) -> Option<usize> {
        self.size.as_ref().map(SizePolicy::len)
    }

    #[cfg(test)]
    pub(crate) fn frequency(&self, node: &Node<K, V>) -> u8 {
        self.size
            .as_ref()
            .map_or(0, |size| size.sketch.frequency(node.hash()))
    }

    pub(crate) fn snapshot(&self) -> PolicySnapshot<K> {
        let Some(size) = &self.size else {
            return PolicySnapshot::default();
        };
        let keys = |list: &List<Arc<Node<K, V>>>| list.iter().filter_map(|node| node.key()).collect();
        PolicySnapshot {
            window: keys(&size.window),
            probation: keys(&size.probation),
            protected: keys(&size.protected),
        }
    }
}

impl<K, V> fmt::Debug for EvictionEngine<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("EvictionEngine");
        if let Some(size) = &self.size {
            d.field("maximum", &size.maximum)
                .field("window_maximum", &size.window_maximum)
                .field("protected_maximum", &size.protected_maximum)
                .field("weighted_size", &size.weighted_size);
        }
        d.field("expiry", &self.expiry).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueStrength;
    use crate::node::{KeyRef, ValueRef};

    type TestNode = Arc<Node<u64, u64>>;

    fn node(key: u64) -> TestNode {
        weighted_node(key, 1)
    }

    fn weighted_node(key: u64, weight: u32) -> TestNode {
        Arc::new(Node::new(
            KeyRef::new(Arc::new(key), false),
            key,
            ValueRef::new(Arc::new(key), ValueStrength::Strong),
            weight,
            0,
        ))
    }

    fn engine(maximum: u64) -> EvictionEngine<u64, u64> {
        EvictionEngine::new(Some(maximum), false, 0.01, 0.80, Expiry::default(), 0)
    }

    fn keys(keys: &[Arc<u64>]) -> Vec<u64> {
        keys.iter().map(|k| **k).collect()
    }

    fn evicted_keys(nodes: &[TestNode]) -> Vec<u64> {
        nodes.iter().map(|n| *n.key().unwrap()).collect()
    }

    fn bump(engine: &mut EvictionEngine<u64, u64>, hash: u64, times: usize) {
        let size = engine.size.as_mut().unwrap();
        for _ in 0..times {
            size.sketch.increment(hash);
        }
    }

    /// Adds a node and runs eviction, like one maintenance pass per write.
    fn add(engine: &mut EvictionEngine<u64, u64>, node: &TestNode) -> Vec<TestNode> {
        engine.on_add(node);
        engine.evict_entries()
    }

    #[test]
    fn test_region_maxima() {
        let size = SizePolicy::<u64, u64>::new(3, false, 0.01, 0.80);
        assert_eq!(size.window_maximum, 1);
        assert_eq!(size.protected_maximum, 1);

        let size = SizePolicy::<u64, u64>::new(1_000, false, 0.01, 0.80);
        assert_eq!(size.window_maximum, 10);
        assert_eq!(size.protected_maximum, 792);

        let size = SizePolicy::<u64, u64>::new(0, false, 0.01, 0.80);
        assert_eq!(size.window_maximum, 0);
        assert_eq!(size.protected_maximum, 0);
    }

    #[test]
    fn test_new_entries_enter_window() {
        let mut engine = engine(100);
        let a = node(1);
        engine.on_add(&a);
        // A second add of the same node is ignored
        engine.on_add(&a);
        assert_eq!(a.queue(), QueueType::Window);
        assert_eq!(engine.weighted_size(), Some(1));
        assert_eq!(engine.linked(), Some(1));
    }

    #[test]
    fn test_scenario_evicts_first_key() {
        let mut engine = engine(3);
        let nodes: Vec<_> = (1..=4).map(node).collect();
        let mut evicted = Vec::new();
        for n in &nodes {
            evicted.extend(add(&mut engine, n));
        }
        assert_eq!(evicted_keys(&evicted), vec![1]);
        assert_eq!(engine.weighted_size(), Some(3));
        assert_eq!(nodes[0].queue(), QueueType::None);
        assert_eq!(engine.frequency(&nodes[0]), 0);

        let snapshot = engine.snapshot();
        assert_eq!(keys(&snapshot.window), vec![4]);
        assert_eq!(keys(&snapshot.probation), vec![2, 3]);
        assert!(snapshot.protected.is_empty());
    }

    #[test]
    fn test_admission_tie_keeps_victim() {
        let mut engine = engine(3);
        let nodes: Vec<_> = (1..=4).map(node).collect();
        for n in &nodes[..3] {
            assert!(add(&mut engine, n).is_empty());
        }
        // Victim (probation head) is key 1; the next candidate is key 3
        bump(&mut engine, 1, 5);
        bump(&mut engine, 3, 4);
        assert_eq!(engine.frequency(&nodes[0]), 5);
        assert_eq!(engine.frequency(&nodes[2]), 5);

        let evicted = add(&mut engine, &nodes[3]);
        assert_eq!(evicted_keys(&evicted), vec![3]);
        assert_eq!(nodes[0].queue(), QueueType::Probation);
    }

    #[test]
    fn test_admission_more_frequent_candidate_wins() {
        let mut engine = engine(3);
        let nodes: Vec<_> = (1..=4).map(node).collect();
        for n in &nodes[..3] {
            add(&mut engine, n);
        }
        bump(&mut engine, 1, 5);
        bump(&mut engine, 3, 5);

        let evicted = add(&mut engine, &nodes[3]);
        assert_eq!(evicted_keys(&evicted), vec![1]);
        assert_eq!(nodes[2].queue(), QueueType::Probation);
    }

    #[test]
    fn test_probation_hit_promotes() {
        let mut engine = engine(100);
        let nodes: Vec<_> = (0..3).map(node).collect();
        for n in &nodes {
            add(&mut engine, n);
        }
        // Window holds one entry; the first two were moved to probation
        assert_eq!(nodes[0].queue(), QueueType::Probation);

        engine.on_access(&nodes[0]);
        assert_eq!(nodes[0].queue(), QueueType::Protected);

        engine.on_access(&nodes[0]);
        assert_eq!(nodes[0].queue(), QueueType::Protected);

        let snapshot = engine.snapshot();
        assert_eq!(keys(&snapshot.protected), vec![0]);
        assert_eq!(keys(&snapshot.probation), vec![1]);
    }

    #[test]
    fn test_protected_overflow_demotes_eldest() {
        // main = 3, protected = 1
        let mut engine = EvictionEngine::new(Some(4), false, 0.25, 0.40, Expiry::default(), 0);
        let nodes: Vec<_> = (0..4).map(node).collect();
        for n in &nodes {
            add(&mut engine, n);
        }
        engine.on_access(&nodes[0]);
        engine.on_access(&nodes[1]);

        assert_eq!(nodes[1].queue(), QueueType::Protected);
        assert_eq!(nodes[0].queue(), QueueType::Probation);
        let snapshot = engine.snapshot();
        assert_eq!(keys(&snapshot.probation).last(), Some(&0));
    }

    #[test]
    fn test_window_hit_moves_to_tail() {
        let mut engine = EvictionEngine::new(Some(100), false, 0.5, 0.8, Expiry::default(), 0);
        let nodes: Vec<_> = (0..3).map(node).collect();
        for n in &nodes {
            add(&mut engine, n);
        }
        engine.on_access(&nodes[0]);
        assert_eq!(keys(&engine.snapshot().window), vec![1, 2, 0]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut engine = engine(10);
        let a = node(1);
        add(&mut engine, &a);
        engine.on_remove(&a);
        engine.on_remove(&a);
        assert_eq!(engine.weighted_size(), Some(0));
        assert_eq!(engine.linked(), Some(0));
        assert_eq!(Arc::strong_count(&a), 1);
    }

    #[test]
    fn test_retired_nodes_are_not_linked() {
        let mut engine = engine(10);
        let a = node(1);
        a.retire();
        engine.on_add(&a);
        assert_eq!(engine.linked(), Some(0));
        assert_eq!(a.queue(), QueueType::None);
    }

    #[test]
    fn test_weight_update_triggers_eviction() {
        let mut engine = EvictionEngine::new(Some(10), true, 0.01, 0.80, Expiry::default(), 0);
        let a = weighted_node(1, 4);
        let b = weighted_node(2, 4);
        assert!(add(&mut engine, &a).is_empty());
        assert!(add(&mut engine, &b).is_empty());
        assert_eq!(engine.weighted_size(), Some(8));

        b.set_weight(7);
        engine.on_update(&b);
        assert_eq!(engine.weighted_size(), Some(11));
        let evicted = engine.evict_entries();
        assert_eq!(evicted.len(), 1);
        assert!(engine.weighted_size().unwrap() <= 10);
    }

    #[test]
    fn test_overweight_candidate_is_rejected() {
        let mut engine = EvictionEngine::new(Some(10), true, 0.01, 0.80, Expiry::default(), 0);
        let small = weighted_node(1, 2);
        let huge = weighted_node(2, 50);
        add(&mut engine, &small);
        let evicted = add(&mut engine, &huge);
        assert_eq!(evicted_keys(&evicted), vec![2]);
        assert_eq!(engine.weighted_size(), Some(2));
    }

    #[test]
    fn test_capacity_invariant_under_churn() {
        let mut engine = engine(50);
        let mut live = 0_usize;
        for key in 0..2_000_u64 {
            let n = node(key);
            live += 1;
            live -= add(&mut engine, &n).len();
            if key % 7 == 0 {
                engine.on_access(&n);
            }
            assert!(engine.weighted_size().unwrap() <= 50);
            assert_eq!(engine.linked(), Some(live));
        }
    }

    #[test]
    fn test_expire_entries() {
        let expiry = Expiry::new(None, Some(Duration::from_secs(1)));
        let mut engine = EvictionEngine::new(Some(10), false, 0.01, 0.80, expiry, 0);
        let a = node(1);
        add(&mut engine, &a);
        assert!(engine.expire_entries(500_000_000).is_empty());

        let expired = engine.expire_entries(2_000_000_000);
        assert_eq!(evicted_keys(&expired), vec![1]);
        assert!(a.timer_link().is_null());
        assert_eq!(a.queue(), QueueType::Window, "Still queued until removed");

        engine.on_remove(&a);
        assert_eq!(a.queue(), QueueType::None);
        assert_eq!(engine.weighted_size(), Some(0));
    }

    #[test]
    fn test_revived_entry_is_rescheduled() {
        let expiry = Expiry::new(None, Some(Duration::from_secs(1)));
        let mut engine = EvictionEngine::new(Some(10), false, 0.01, 0.80, expiry, 0);
        let a = node(1);
        add(&mut engine, &a);

        let expired = engine.expire_entries(2_000_000_000);
        assert_eq!(evicted_keys(&expired), vec![1]);

        // Rewritten before it could be unmapped
        a.set_write_time(2_000_000_000);
        engine.reschedule(&a);
        assert!(!a.timer_link().is_null());
        assert_eq!(engine.weighted_size(), Some(1));
        assert!(engine.expire_entries(2_500_000_000).is_empty());
        assert_eq!(evicted_keys(&engine.expire_entries(3_000_000_000)), vec![1]);
    }

    #[test]
    fn test_expire_reschedules_refreshed_entries() {
        let expiry = Expiry::new(Some(Duration::from_secs(1)), None);
        let mut engine = EvictionEngine::new(None, false, 0.01, 0.80, expiry, 0);
        let a = node(1);
        engine.on_add(&a);

        // A read that was never drained still counts when the timer fires
        a.set_access_time(1_500_000_000);
        assert!(engine.expire_entries(2_000_000_000).is_empty());
        assert_eq!(evicted_keys(&engine.expire_entries(3_000_000_000)), vec![1]);
    }

    #[test]
    fn test_expiry_deadline() {
        let expiry = Expiry::new(Some(Duration::from_nanos(50)), Some(Duration::from_nanos(80)));
        let a = node(1);
        a.set_access_time(40);
        assert_eq!(expiry.deadline(&*a), Some(80));
        a.set_access_time(10);
        assert_eq!(expiry.deadline(&*a), Some(60));
        assert!(!expiry.has_expired(&*a, 59));
        assert!(expiry.has_expired(&*a, 60));
        assert_eq!(Expiry::default().deadline(&*a), None);
    }
}
