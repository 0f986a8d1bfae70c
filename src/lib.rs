#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Cache / CacheBuilder                     (cache)                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  LocalCache: reads, writes, loading, maintenance pass   (local)      │
//! ├───────────────┬──────────────────────┬───────────────────────────────┤
//! │  Table        │  Read / Write buffers │  EvictionEngine              │
//! │  (table)      │  (buffer)             │  (policy)                    │
//! │  lock-free    │  striped, lossy /     │  window + SLRU queues,       │
//! │  reads        │  lossless             │  FrequencySketch, TimerWheel │
//! └───────────────┴──────────────────────┴───────────────────────────────┘
//!           ▲
//!           │ which of the above a cache gets
//!  ConfigDescriptor ──synthesize──▶ CacheLayout      (compose)
//! ```
//!
//! ## Choosing a configuration
//!
//! | Need | Builder call | Layout letters |
//! |------|--------------|----------------|
//! | Bound by entry count | [`maximum_size`](CacheBuilder::maximum_size) | `MS` |
//! | Bound by weight | [`maximum_weight`](CacheBuilder::maximum_weight) + [`weigher`](CacheBuilder::weigher) | `MW` |
//! | Idle timeout | [`expire_after_access`](CacheBuilder::expire_after_access) | `A` |
//! | Time to live | [`expire_after_write`](CacheBuilder::expire_after_write) | `W` |
//! | Background reload | [`refresh_after_write`](CacheBuilder::refresh_after_write) + [`loader`](CacheBuilder::loader) | `R` |
//! | Removal callback | [`removal_listener`](CacheBuilder::removal_listener) | `L` |
//! | Counters | [`record_stats`](CacheBuilder::record_stats) | `S` |
//!
//! The first letter of a layout name is the key strength (`S`trong or
//! `W`eak), the next one or two the value strength (`S`, `W` or `So`ft).
//!
//! ## Deterministic time in tests
//!
//! ```rust
//! use std::time::Duration;
//! use wtinylfu::{Cache, FakeTicker};
//!
//! let ticker = FakeTicker::new();
//! let cache: Cache<&str, u32> = Cache::builder()
//!     .expire_after_write(Duration::from_secs(30))
//!     .ticker(ticker.clone())
//!     .build()
//!     .unwrap();
//!
//! cache.put("session", 1);
//! ticker.advance(Duration::from_secs(30));
//! assert!(cache.get("session").is_none());
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: the public cache handle and its builder
//! - [`compose`]: turns a configuration into a cache layout
//! - [`config`]: configuration types
//! - [`sketch`]: the frequency sketch used for admission
//! - [`stats`]: statistics snapshots
//! - [`notification`]: removal causes and listeners
//! - [`ticker`]: time sources
//! - [`event`] and [`simulation`]: replaying recorded workloads

/// Intrusive doubly linked list.
///
/// **Note**: internal infrastructure that hands out raw pointers. The queues
/// and the timer wheel keep their nodes' links up to date.
pub(crate) mod list;

/// Count-min sketch of 4-bit counters with periodic aging.
///
/// Estimates how often a key has been seen recently. The admission policy
/// compares the estimates of a candidate and a victim.
pub mod sketch;

/// Hierarchical timer wheel indexing entries by expiration deadline.
pub(crate) mod timer_wheel;

/// Cache entries and their liveness state machine.
pub(crate) mod node;

/// Sharded concurrent hash table with lock-free reads.
pub(crate) mod table;

/// Read and write buffers between client threads and the maintenance pass.
pub(crate) mod buffer;

/// Window TinyLFU eviction and timer-driven expiration.
pub(crate) mod policy;

/// Layout composition.
///
/// Decides from a [`ConfigDescriptor`](config::ConfigDescriptor) which fields
/// and capabilities a cache needs and rejects contradictory configurations.
pub mod compose;

/// Cache configuration.
pub mod config;

/// Cache runtime behind the [`Cache`] handle.
pub(crate) mod local;

/// The public cache handle and builder.
pub mod cache;

/// Hit, miss, load and eviction statistics.
pub mod stats;

/// Removal causes and listener delivery.
pub mod notification;

/// Time sources.
pub mod ticker;

/// Access events from recorded traces.
pub mod event;

/// Replaying access events against a cache.
pub mod simulation;

/// Error types.
pub mod error;

pub use cache::{Cache, CacheBuilder};
pub use compose::{CacheLayout, Capability};
pub use config::{ConfigDescriptor, KeyStrength, Maximum, ValueStrength};
pub use error::{BoxError, ConfigError, EventError, LoadError};
pub use event::AccessEvent;
pub use notification::{RemovalCause, RemovalListener};
pub use policy::PolicySnapshot;
pub use simulation::ReplayStats;
pub use stats::CacheStats;
pub use ticker::{FakeTicker, SystemTicker, Ticker};
