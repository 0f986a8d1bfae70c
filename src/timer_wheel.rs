//! Hierarchical timer wheel
//!
//! Entries with a deadline are hashed into coarse-grained buckets so that
//! expiration costs O(1) per entry instead of a scan or a priority queue.
//!
//! ```text
//!   level 0: 64 buckets × 2^30 ns  (≈1.07 s each)
//!   level 1: 64 buckets × 2^36 ns  (≈1.14 min each)
//!   level 2: 32 buckets × 2^42 ns  (≈1.22 h each)
//!   level 3:  4 buckets × 2^47 ns  (≈1.63 d each)
//!   level 4:  1 bucket  (overflow, ≈6.5 d and beyond)
//! ```
//!
//! A deadline lands on the finest level whose next level's span exceeds the
//! remaining duration. Every advance sweeps the current level 0 bucket, and
//! each level whose tick count moved is swept over the elapsed buckets. Each swept entry is either expired, when
//! its deadline has passed, or rescheduled into a finer bucket, which is how
//! entries cascade down the hierarchy.

use core::fmt;
use core::mem;
use core::ptr;
use std::sync::Arc;

use crate::list::List;
use crate::node::{Node, NO_TIMER};

const BUCKETS: [usize; 5] = [64, 64, 32, 4, 1];

const SPANS: [u64; 6] = [
    1 << 30, // 1.07s
    1 << 36, // 1.14m
    1 << 42, // 1.22h
    1 << 47, // 1.63d
    1 << 49, // 6.5d
    1 << 49, // 6.5d
];

const SHIFT: [u32; 5] = [
    SPANS[0].trailing_zeros(),
    SPANS[1].trailing_zeros(),
    SPANS[2].trailing_zeros(),
    SPANS[3].trailing_zeros(),
    SPANS[4].trailing_zeros(),
];

fn pack(level: usize, index: usize) -> u32 {
    // level < 5 and index < 64
    ((level as u32) << 16) | index as u32
}

fn unpack(bucket: u32) -> (usize, usize) {
    ((bucket >> 16) as usize, (bucket & 0xFFFF) as usize)
}

/// Expiration index over cache nodes.
///
/// Only the maintenance thread may touch the wheel.
pub(crate) struct TimerWheel<K, V> {
    wheel: Vec<Vec<List<Arc<Node<K, V>>>>>,
    nanos: u64,
}

impl<K, V> TimerWheel<K, V> {
    /// Creates an empty wheel whose clock starts at `now`.
    pub(crate) fn new(now: u64) -> Self {
        let wheel = BUCKETS
            .iter()
            .map(|&count| (0..count).map(|_| List::new()).collect())
            .collect();
        Self { wheel, nanos: now }
    }

    /// Links a node into the bucket for its current deadline, moving it if it
    /// was already scheduled.
    pub(crate) fn schedule(&mut self, node: &Arc<Node<K, V>>) {
        self.deschedule(node);
        let (level, index) = self.find_bucket(node.deadline());
        let link = self.wheel[level][index].push_back(Arc::clone(node));
        node.set_timer_link(link);
        node.set_timer_bucket(pack(level, index));
    }

    /// Unlinks a node if it is scheduled.
    pub(crate) fn deschedule(&mut self, node: &Node<K, V>) {
        let link = node.timer_link();
        if link.is_null() {
            return;
        }
        let (level, index) = unpack(node.timer_bucket());
        // SAFETY: the link was produced by `push_back` on this bucket and is
        // cleared whenever the node leaves it
        if let Some(entry) = unsafe { self.wheel[level][index].remove(link) } {
            drop(entry.into_value());
        }
        node.set_timer_link(ptr::null_mut());
        node.set_timer_bucket(NO_TIMER);
    }

    /// Advances the clock to `now` and returns the nodes whose deadline has passed.
    ///
    /// Returned nodes are already unlinked from the wheel. Nodes that were swept
    /// but are not yet due are rescheduled.
    pub(crate) fn advance(&mut self, now: u64) -> Vec<Arc<Node<K, V>>> {
        let previous = self.nanos;
        let now = now.max(previous);
        self.nanos = now;

        let mut expired = Vec::new();
        for (level, &shift) in SHIFT.iter().enumerate() {
            let previous_ticks = previous >> shift;
            let current_ticks = now >> shift;
            // The current level 0 bucket is swept even within a tick: it holds
            // deadlines that fall before the next tick, and late schedules.
            if level > 0 && current_ticks <= previous_ticks {
                break;
            }
            self.expire(level, previous_ticks, current_ticks - previous_ticks, &mut expired);
        }
        expired
    }

    /// Sweeps the buckets of one level that the clock moved over.
    fn expire(
        &mut self,
        level: usize,
        previous_ticks: u64,
        delta: u64,
        expired: &mut Vec<Arc<Node<K, V>>>,
    ) {
        let len = self.wheel[level].len();
        let mask = len - 1;
        let steps = delta.saturating_add(1).min(len as u64) as usize;
        let start = (previous_ticks as usize) & mask;

        for i in start..start + steps {
            let index = i & mask;
            let mut bucket = mem::take(&mut self.wheel[level][index]);
            while let Some(entry) = bucket.remove_first() {
                // SAFETY: entries handed out by a list are never sentinels
                let deadline = unsafe { entry.get_value() }.deadline();
                if deadline <= self.nanos {
                    let node = entry.into_value();
                    node.set_timer_link(ptr::null_mut());
                    node.set_timer_bucket(NO_TIMER);
                    expired.push(node);
                } else {
                    let (new_level, new_index) = self.find_bucket(deadline);
                    let raw = Box::into_raw(entry);
                    // SAFETY: raw was just detached from `bucket` and is not linked anywhere
                    unsafe {
                        (*raw).get_value().set_timer_bucket(pack(new_level, new_index));
                        self.wheel[new_level][new_index].attach_last_from_other_list(raw);
                    }
                }
            }
        }
    }

    /// Determines the bucket that the deadline should be placed in.
    ///
    /// A deadline that already passed goes into the current bucket, which every
    /// advance sweeps.
    fn find_bucket(&self, time: u64) -> (usize, usize) {
        let time = time.max(self.nanos);
        let duration = time - self.nanos;
        let last = self.wheel.len() - 1;
        for level in 0..last {
            if duration < SPANS[level + 1] {
                let ticks = time >> SHIFT[level];
                let index = (ticks as usize) & (self.wheel[level].len() - 1);
                return (level, index);
            }
        }
        (last, 0)
    }

    /// Number of scheduled nodes.
    pub(crate) fn len(&self) -> usize {
        self.wheel
            .iter()
            .flat_map(|level| level.iter())
            .map(List::len)
            .sum()
    }
}

impl<K, V> fmt::Debug for TimerWheel<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("nanos", &self.nanos)
            .field("scheduled", &self.len())
            .finish()
    }
}
