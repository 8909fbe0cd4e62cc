//! ccmap-core - the concurrent segmented cache map
//!
//! This crate is the core described by SPEC_FULL.md §4: the segmented hash
//! table, the `KeyRef`/`ValueRef` reference-strength abstraction, the
//! recency/eviction/expiration machinery, the cleanup protocol, and the
//! at-most-one-compute loading path, wrapped in the public [`Cache`]/
//! [`CacheBuilder`] surface.
//!
//! `ccmap-common` owns everything at the edge of this core (errors, the
//! removal-cause tag, the injectable clock, equivalence strategies); this
//! crate owns the table itself.

mod builder;
mod cache;
mod deque;
mod entry;
mod hashing;
mod key_ref;
mod loader;
mod map;
mod notifier;
mod owner;
mod reclamation;
mod recency;
mod segment;
mod stats;
mod value_ref;

pub mod pressure;

pub use builder::CacheBuilder;
pub use cache::{Cache, EntryView};
pub use owner::Owner;
pub use pressure::{MemoryPressurePolicy, NeverUnderPressure};
pub use stats::{CacheStats, CacheStatsSnapshot};

pub use ccmap_common::{
    CcmapError, CcmapResult, Clock, Equivalence, FnEquivalence, KeyStrength, RemovalCause,
    SystemClock, ValueStrength,
};
