//! Read and write buffers
//!
//! Client threads never touch the eviction policy directly. Instead they record
//! what happened into one of two buffers, which the maintenance pass replays
//! under the maintenance lock.
//!
//! ```text
//!   get ──▶ ReadBuffer  (striped, lossy)   ──┐
//!                                            ├──▶ maintenance ──▶ policy
//!   put ──▶ WriteBuffer (bounded, lossless) ──┘
//! ```
//!
//! Losing a read only costs a little recency and frequency precision, so a full
//! read stripe simply drops the event. Writes change the set of live entries
//! and must never be lost; a writer that finds the write buffer full runs the
//! maintenance pass itself and retries.

use core::fmt;
use std::cell::Cell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;

use crate::node::Node;

/// Slots per read buffer stripe.
const READ_STRIPE_CAPACITY: usize = 16;

/// Write buffer slots per read stripe.
const WRITE_SLOTS_PER_STRIPE: usize = 128;

/// Returns the number of read stripes for this machine.
pub(crate) fn default_stripes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .next_power_of_two()
}

static NEXT_PROBE: AtomicUsize = AtomicUsize::new(0);

std::thread_local! {
    static PROBE: Cell<usize> = Cell::new(
        NEXT_PROBE.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9E37_79B9)
    );
}

/// Outcome of offering an event to the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The event was recorded.
    Success,
    /// The stripe was full and the event was dropped.
    Full,
}

/// Striped lossy buffer of read events.
pub(crate) struct ReadBuffer<T> {
    stripes: Box<[ArrayQueue<T>]>,
}

impl<T> ReadBuffer<T> {
    pub(crate) fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1).next_power_of_two();
        Self {
            stripes: (0..stripes)
                .map(|_| ArrayQueue::new(READ_STRIPE_CAPACITY))
                .collect(),
        }
    }

    /// Records an event in the calling thread's stripe, dropping it if full.
    pub(crate) fn offer(&self, item: T) -> Offer {
        let probe = PROBE.with(Cell::get);
        let stripe = &self.stripes[probe & (self.stripes.len() - 1)];
        match stripe.push(item) {
            Ok(()) => Offer::Success,
            Err(_) => Offer::Full,
        }
    }

    /// Removes every buffered event, stripe by stripe.
    pub(crate) fn drain(&self, mut consumer: impl FnMut(T)) -> usize {
        let mut drained = 0;
        for stripe in self.stripes.iter() {
            // Bounded so that concurrent producers cannot starve the caller
            for _ in 0..stripe.capacity() {
                match stripe.pop() {
                    Some(item) => {
                        consumer(item);
                        drained += 1;
                    }
                    None => break,
                }
            }
        }
        drained
    }

    #[cfg(test)]
    pub(crate) fn stripes(&self) -> usize {
        self.stripes.len()
    }
}

impl<T> fmt::Debug for ReadBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

/// A structural change waiting to be applied to the policy.
pub(crate) enum WriteTask<K, V> {
    /// A node was inserted into the table.
    Add(Arc<Node<K, V>>),
    /// A node's value or weight was replaced in place.
    Update(Arc<Node<K, V>>),
    /// A node was unmapped from the table.
    Remove(Arc<Node<K, V>>),
}

impl<K, V> fmt::Debug for WriteTask<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTask::Add(node) => f.debug_tuple("Add").field(&node.hash()).finish(),
            WriteTask::Update(node) => f.debug_tuple("Update").field(&node.hash()).finish(),
            WriteTask::Remove(node) => f.debug_tuple("Remove").field(&node.hash()).finish(),
        }
    }
}

/// Bounded buffer of write tasks.
pub(crate) struct WriteBuffer<T> {
    queue: ArrayQueue<T>,
}

impl<T> WriteBuffer<T> {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            queue: ArrayQueue::new(stripes.max(1) * WRITE_SLOTS_PER_STRIPE),
        }
    }

    /// Tries to enqueue a task, handing it back when the buffer is full.
    pub(crate) fn offer(&self, task: T) -> Result<(), T> {
        self.queue.push(task)
    }

    pub(crate) fn poll(&self) -> Option<T> {
        self.queue.pop()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T> fmt::Debug for WriteBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

/// Whether a maintenance pass is needed or in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// Nothing to do.
    Idle,
    /// A pass should run soon.
    Required,
    /// A pass is running and nothing new arrived.
    ProcessingToIdle,
    /// A pass is running and more work arrived meanwhile.
    ProcessingToRequired,
}

impl Status {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Status::Idle,
            1 => Status::Required,
            2 => Status::ProcessingToIdle,
            _ => Status::ProcessingToRequired,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Status::Idle => 0,
            Status::Required => 1,
            Status::ProcessingToIdle => 2,
            Status::ProcessingToRequired => 3,
        }
    }
}

/// Four-state drain flag shared by all threads of one cache.
pub(crate) struct DrainStatus {
    state: CachePadded<AtomicU8>,
}

impl DrainStatus {
    pub(crate) fn new() -> Self {
        Self {
            state: CachePadded::new(AtomicU8::new(Status::Idle.as_u8())),
        }
    }

    pub(crate) fn get(&self) -> Status {
        Status::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: Status) {
        self.state.store(status.as_u8(), Ordering::Release);
    }

    pub(crate) fn compare_and_set(&self, current: Status, new: Status) -> bool {
        self.state
            .compare_exchange(current.as_u8(), new.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a read should trigger a maintenance attempt.
    pub(crate) fn should_drain(&self, delayable: bool) -> bool {
        match self.get() {
            Status::Idle => !delayable,
            Status::Required => true,
            Status::ProcessingToIdle | Status::ProcessingToRequired => false,
        }
    }

    /// Marks that more work arrived while a pass may be running.
    pub(crate) fn mark_required(&self) {
        loop {
            let status = self.get();
            let next = match status {
                Status::Idle | Status::Required => Status::Required,
                Status::ProcessingToIdle | Status::ProcessingToRequired => {
                    Status::ProcessingToRequired
                }
            };
            if status == next || self.compare_and_set(status, next) {
                return;
            }
        }
    }
}

impl fmt::Debug for DrainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DrainStatus").field(&self.get()).finish()
    }
}
