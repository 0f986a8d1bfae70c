//! Time sources
//!
//! Timestamps on entries are plain `u64` nanosecond readings taken from a
//! [`Ticker`]. Production caches use [`SystemTicker`]; tests drive time by hand
//! through [`FakeTicker`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic nanosecond clock.
pub trait Ticker: Send + Sync {
    /// Returns the number of nanoseconds elapsed since an arbitrary fixed origin.
    fn read(&self) -> u64;
}

/// Ticker backed by [`Instant`], anchored at its construction time.
#[derive(Debug, Clone, Copy)]
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    /// Creates a ticker whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn read(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A manually advanced ticker for deterministic tests.
///
/// Clones share the same underlying clock.
///
/// ```
/// use std::time::Duration;
/// use wtinylfu::{FakeTicker, Ticker};
///
/// let ticker = FakeTicker::new();
/// ticker.advance(Duration::from_secs(1));
/// assert_eq!(ticker.read(), 1_000_000_000);
/// ```
#[derive(Clone, Default)]
pub struct FakeTicker {
    nanos: Arc<AtomicU64>,
}

impl FakeTicker {
    /// Creates a ticker reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Moves the clock forward by a raw number of nanoseconds.
    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Ticker for FakeTicker {
    fn read(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }
}

impl fmt::Debug for FakeTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeTicker")
            .field("nanos", &self.read())
            .finish()
    }
}
