//! # CacheBuilder
//!
//! Purpose: the config record, made concrete. Every builder option gets
//! an owner somewhere in `ccmap-core`, and conflicting combinations are
//! rejected here rather than discovered later.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ccmap_common::{CcmapError, CcmapResult, Clock, Equivalence, KeyStrength, SystemClock, ValueStrength};

use crate::cache::Cache;
use crate::notifier::Listener;

const DEFAULT_SEGMENT_COUNT: usize = 16;
const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Builds a [`Cache`]. Every setter consumes and returns `self`, so calls
/// chain: `CacheBuilder::new().maximum_size(10_000).weak_keys().build()`.
pub struct CacheBuilder<K, V> {
    segment_count: usize,
    initial_capacity: usize,
    maximum_size: Option<u64>,
    key_strength: KeyStrength,
    value_strength: ValueStrength,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    key_equivalence: Option<Arc<dyn Equivalence<K>>>,
    value_equivalence: Option<Arc<dyn Equivalence<V>>>,
    removal_listener: Option<Listener<K, V>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        CacheBuilder {
            segment_count: DEFAULT_SEGMENT_COUNT,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            maximum_size: None,
            key_strength: KeyStrength::Strong,
            value_strength: ValueStrength::Strong,
            expire_after_write: None,
            expire_after_access: None,
            key_equivalence: None,
            value_equivalence: None,
            removal_listener: None,
            clock: None,
        }
    }
}

impl<K, V> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments (concurrency level). Rounded up to the next
    /// power of two by `build`.
    pub fn concurrency_level(mut self, segment_count: usize) -> Self {
        self.segment_count = segment_count;
        self
    }

    /// Pre-sizing hint for each segment's bucket table, divided
    /// approximately evenly across segments and rounded up to the next
    /// power of two per segment (spec §6 `initial_capacity`).
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Caps the cache's total entry count, divided approximately evenly
    /// across segments.
    pub fn maximum_size(mut self, max_entries: u64) -> Self {
        self.maximum_size = Some(max_entries);
        self
    }

    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        self.expire_after_write = Some(duration);
        self
    }

    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        self.expire_after_access = Some(duration);
        self
    }

    /// Holds keys with [`Owner`](crate::Owner)-backed weak references
    /// instead of owning them outright. Forces identity comparison for
    /// keys; conflicts with `key_equivalence`.
    pub fn weak_keys(mut self) -> Self {
        self.key_strength = KeyStrength::Weak;
        self
    }

    pub fn weak_values(mut self) -> Self {
        self.value_strength = ValueStrength::Weak;
        self
    }

    /// See `ccmap_core::pressure` for what "soft" actually means in this
    /// port: functionally identical to `weak_values`, reclaimed only when
    /// a caller-supplied `MemoryPressurePolicy` says to.
    pub fn soft_values(mut self) -> Self {
        self.value_strength = ValueStrength::Soft;
        self
    }

    /// Overrides how keys are compared/hashed. Only meaningful for
    /// `Strong` key strength - `build` rejects this combined with
    /// `weak_keys`.
    pub fn key_equivalence(mut self, equivalence: impl Equivalence<K> + 'static) -> Self {
        self.key_equivalence = Some(Arc::new(equivalence));
        self
    }

    pub fn value_equivalence(mut self, equivalence: impl Equivalence<V> + 'static) -> Self {
        self.value_equivalence = Some(Arc::new(equivalence));
        self
    }

    /// Registers a listener invoked for every removal, on whichever
    /// thread drains the notification queue after releasing the segment
    /// lock. A panicking listener is caught and logged; it never corrupts
    /// map state.
    ///
    /// Key and value are each `Option`: a removal caused by weak-key or
    /// weak/soft-value reclamation fires with `None` on whichever side
    /// was just reclaimed, since that referent no longer exists to hand
    /// over.
    pub fn removal_listener(
        mut self,
        listener: impl Fn(Option<&K>, Option<&V>, ccmap_common::RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    /// Injects a deterministic time source. Production callers should
    /// not normally need this - `build` defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> CcmapResult<Cache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Eq + Hash + Clone + Send + Sync + 'static,
    {
        if self.segment_count == 0 {
            return Err(CcmapError::InvalidConfig(
                "concurrency_level must be at least 1".into(),
            ));
        }
        if self.key_strength == KeyStrength::Weak && self.key_equivalence.is_some() {
            return Err(CcmapError::InvalidConfig(
                "weak_keys forces identity equivalence and cannot be combined with a custom key_equivalence"
                    .into(),
            ));
        }
        if self.value_strength != ValueStrength::Strong && self.value_equivalence.is_some() {
            return Err(CcmapError::InvalidConfig(
                "weak_values/soft_values force identity equivalence and cannot be combined with a custom value_equivalence"
                    .into(),
            ));
        }

        let key_equivalence: Arc<dyn Equivalence<K>> = self
            .key_equivalence
            .unwrap_or_else(|| Arc::new(ccmap_common::equivalence::SemanticEquivalence));
        let value_equivalence: Arc<dyn Equivalence<V>> = self
            .value_equivalence
            .unwrap_or_else(|| Arc::new(ccmap_common::equivalence::SemanticEquivalence));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        Ok(Cache::from_builder(
            self.segment_count,
            self.initial_capacity,
            self.maximum_size,
            self.expire_after_write,
            self.expire_after_access,
            self.key_strength,
            self.value_strength,
            key_equivalence,
            value_equivalence,
            self.removal_listener,
            clock,
        ))
    }
}
