//! Count-min frequency sketch
//!
//! A compact popularity estimator used by the admission filter. Each `u64` in
//! the table packs sixteen 4-bit saturating counters. An item maps to one
//! counter in each of four rows; its frequency is the minimum of those four
//! counters, which bounds the over-count caused by hash collisions.
//!
//! ```text
//!   table[i] (64 bits) = 16 counters × 4 bits
//!   ┌────┬────┬────┬────┬─────┬────┐
//!   │ c0 │ c1 │ c2 │ c3 │ ... │c15 │
//!   └────┴────┴────┴────┴─────┴────┘
//!
//!   item ──▶ start = (spread(item) & 3) << 2
//!            row r uses table[index_of(item, r)] counter (start + r)
//! ```
//!
//! Once the number of successful increments reaches the sample size (ten times
//! the table capacity) every counter is halved, so the estimate tracks recent
//! popularity rather than all-time popularity.
//!
//! The table is allocated lazily by [`FrequencySketch::ensure_capacity`]; until
//! then increments are ignored and every frequency reads as zero.

use core::fmt;

const RESET_MASK: u64 = 0x7777_7777_7777_7777;
const ONE_MASK: u64 = 0x1111_1111_1111_1111;

/// Per-row seeds for the index hash.
const SEEDS: [u64; 4] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];

/// Upper bound on the number of table slots.
const MAXIMUM_CAPACITY: u64 = 1 << 30;

/// A 4-bit count-min sketch with periodic aging.
pub struct FrequencySketch {
    table: Vec<u64>,
    table_mask: u64,
    sample_size: u64,
    size: u64,
}

impl FrequencySketch {
    /// Creates an unallocated sketch. Call [`ensure_capacity`](Self::ensure_capacity)
    /// before it starts counting.
    pub fn new() -> Self {
        Self {
            table: Vec::new(),
            table_mask: 0,
            sample_size: 0,
            size: 0,
        }
    }

    /// Grows the table to accommodate `maximum` distinct items.
    ///
    /// The table never shrinks. Growing discards all recorded frequencies.
    pub fn ensure_capacity(&mut self, maximum: u64) {
        let maximum = maximum.min(MAXIMUM_CAPACITY);
        if self.table.len() as u64 >= maximum.max(1) {
            return;
        }

        let slots = maximum.max(1).next_power_of_two();
        // maximum is clamped to 2^30 above, so slots fits in usize
        self.table = vec![0; slots as usize];
        self.table_mask = slots - 1;
        self.sample_size = if maximum == 0 { 10 } else { 10 * maximum };
        self.size = 0;
    }

    /// Returns true until the table has been allocated.
    pub fn is_not_initialized(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the estimated number of occurrences of an item, at most 15.
    pub fn frequency(&self, hash: u64) -> u8 {
        if self.is_not_initialized() {
            return 0;
        }

        let hash = spread(hash);
        let start = (hash & 3) << 2;
        let mut frequency = u8::MAX;
        for row in 0..4 {
            let index = self.index_of(hash, row);
            let shift = (start + row as u64) << 2;
            let count = ((self.table[index] >> shift) & 0xF) as u8;
            frequency = frequency.min(count);
        }
        frequency
    }

    /// Increments the popularity of an item if it does not exceed the maximum (15).
    ///
    /// When the number of increments reaches the sample size, all counters are
    /// halved in a single aging pass.
    pub fn increment(&mut self, hash: u64) {
        if self.is_not_initialized() {
            return;
        }

        let hash = spread(hash);
        let start = (hash & 3) << 2;
        let mut added = false;
        for row in 0..4 {
            let index = self.index_of(hash, row);
            added |= self.increment_at(index, start + row as u64);
        }

        if added {
            self.size += 1;
            if self.size == self.sample_size {
                self.reset();
            }
        }
    }

    /// Number of successful increments since the last aging pass.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of successful increments that triggers aging.
    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    /// Increments counter `counter` (0..16) of `table[index]` unless saturated.
    fn increment_at(&mut self, index: usize, counter: u64) -> bool {
        let offset = counter << 2;
        let mask = 0xF_u64 << offset;
        if self.table[index] & mask != mask {
            self.table[index] += 1 << offset;
            return true;
        }
        false
    }

    /// Halves every counter and the sample count.
    fn reset(&mut self) {
        let mut odd = 0_u64;
        for slot in &mut self.table {
            odd += u64::from((*slot & ONE_MASK).count_ones());
            *slot = (*slot >> 1) & RESET_MASK;
        }
        self.size = (self.size - (odd >> 2)) >> 1;
    }

    fn index_of(&self, item: u64, row: usize) -> usize {
        let mut hash = item.wrapping_add(SEEDS[row]).wrapping_mul(SEEDS[row]);
        hash = hash.wrapping_add(hash >> 32);
        // table_mask < 2^30
        (hash & self.table_mask) as usize
    }
}

impl Default for FrequencySketch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrequencySketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencySketch")
            .field("slots", &self.table.len())
            .field("size", &self.size)
            .field("sample_size", &self.sample_size)
            .finish()
    }
}

/// Applies a supplemental hash to defend against poor-quality key hashes.
fn spread(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
