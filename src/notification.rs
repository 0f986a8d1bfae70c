//! Removal notifications
//!
//! A cache built with a removal listener collects one [`Notification`] per
//! removed entry while it holds its locks, and hands them to the listener only
//! after every lock is released. A panicking listener is logged and otherwise
//! ignored.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// The entry's expiration deadline passed.
    Expired,
    /// The entry was evicted to keep the cache within its maximum.
    Size,
    /// The entry was removed by the user.
    Explicit,
    /// The entry's value was replaced by the user.
    Replaced,
    /// The entry's key or value was reclaimed.
    Collected,
}

impl RemovalCause {
    /// True if the removal was automatic rather than requested by the user.
    pub fn was_evicted(self) -> bool {
        matches!(
            self,
            RemovalCause::Expired | RemovalCause::Size | RemovalCause::Collected
        )
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalCause::Expired => "expired",
            RemovalCause::Size => "size",
            RemovalCause::Explicit => "explicit",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Collected => "collected",
        };
        f.write_str(name)
    }
}

/// Callback invoked for every removed entry.
///
/// The key or value is `None` when it was reclaimed before the notification
/// was delivered.
pub type RemovalListener<K, V> =
    Arc<dyn Fn(Option<Arc<K>>, Option<Arc<V>>, RemovalCause) + Send + Sync>;

/// A pending removal event.
pub(crate) struct Notification<K, V> {
    pub(crate) key: Option<Arc<K>>,
    pub(crate) value: Option<Arc<V>>,
    pub(crate) cause: RemovalCause,
}

impl<K, V> Notification<K, V> {
    pub(crate) fn new(key: Option<Arc<K>>, value: Option<Arc<V>>, cause: RemovalCause) -> Self {
        Self { key, value, cause }
    }
}

/// Delivers notifications in order, isolating the caller from listener panics.
pub(crate) fn dispatch<K, V>(
    listener: &RemovalListener<K, V>,
    notifications: impl IntoIterator<Item = Notification<K, V>>,
) {
    for Notification { key, value, cause } in notifications {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(key, value, cause)));
        if result.is_err() {
            warn!(%cause, "removal listener panicked");
        }
    }
}
