//! # Map
//!
//! Purpose: the segment array and the routing logic that picks exactly
//! one segment per keyed call by hash (spec §2 component 8, §4.6).
//!
//! `Map` is, like `Segment`, agnostic of key/value strength and
//! equivalence - callers (`Cache`) build the `matches` closures and
//! `KeySource`/`ValueSource` values themselves, using whatever
//! `Equivalence` strategy the builder configured. This keeps the hashing
//! and segment-selection logic in one place without tangling it with
//! strength bookkeeping.

use std::sync::Arc;

use ccmap_common::Clock;

use crate::hashing::{segment_index, spread};
use crate::key_ref::KeyGuard;
use crate::notifier::RemovalNotifier;
use crate::segment::{GetOutcome, KeySource, LoadBegin, PutOutcome, Segment, SegmentConfig, ValueSource};
use crate::stats::CacheStats;

/// Matches spec §4.6's retry budget for `contains_value`'s cross-segment,
/// best-effort scan.
const CONTAINS_VALUE_RETRIES: u32 = 3;

/// Spec §4.5's hard ceiling on segment count, independent of any
/// size bound.
const MAX_SEGMENTS: usize = 1 << 16;

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

pub(crate) struct MapConfig {
    pub segment_count: usize,
    pub initial_capacity: usize,
    pub evicts_by_size: bool,
    pub total_max_entries: Option<u64>,
    pub expires: bool,
    pub expire_after_write_nanos: Option<i64>,
    pub expire_after_access_nanos: Option<i64>,
    pub clock: Arc<dyn Clock>,
}

pub(crate) struct Map<K, V> {
    segments: Vec<Segment<K, V>>,
    segment_shift: u32,
    segment_mask: usize,
}

impl<K: Clone, V: Clone> Map<K, V> {
    pub(crate) fn new(
        config: MapConfig,
        notifier: Arc<RemovalNotifier<K, V>>,
        stats: Arc<CacheStats>,
    ) -> Self {
        // Smallest power of two >= concurrency_level, then capped at
        // MAX_SEGMENTS and (when size-bounded) at max_entries - more
        // segments than retainable entries would leave some segments
        // permanently empty and others over-subscribed (spec §4.6).
        let mut segment_count = config.segment_count.max(1).next_power_of_two().min(MAX_SEGMENTS);
        if config.evicts_by_size {
            if let Some(max) = config.total_max_entries {
                while segment_count > 1 && segment_count as u64 > max {
                    segment_count >>= 1;
                }
            }
        }
        let segment_bits = segment_count.trailing_zeros();
        let segment_shift = 32u32.saturating_sub(segment_bits);

        // Split so the per-segment sums equal the configured total exactly
        // (spec §4.6 "splits max_entries across segments such that the sum
        // equals the configured total"), rather than ceil-dividing into
        // every segment and over-provisioning by up to segment_count - 1.
        let segment_max_split = config.total_max_entries.map(|total| {
            let base = total / segment_count as u64;
            let remainder = total % segment_count as u64;
            (base, remainder)
        });
        let initial_table_len =
            ceil_div(config.initial_capacity.max(1) as u64, segment_count as u64) as usize;

        let segments = (0..segment_count)
            .map(|i| {
                let max_entries = segment_max_split.map(|(base, remainder)| {
                    if (i as u64) < remainder {
                        base + 1
                    } else {
                        base
                    }
                });
                let segment_config = SegmentConfig {
                    initial_table_len,
                    evicts_by_size: config.evicts_by_size,
                    expires: config.expires,
                    max_entries,
                    expire_after_write_nanos: config.expire_after_write_nanos,
                    expire_after_access_nanos: config.expire_after_access_nanos,
                    clock: Arc::clone(&config.clock),
                };
                Segment::new(segment_config, Arc::clone(&notifier), Arc::clone(&stats))
            })
            .collect();

        Map {
            segments,
            segment_shift,
            segment_mask: segment_count - 1,
        }
    }

    fn segment_for(&self, hash: u32) -> &Segment<K, V> {
        let idx = segment_index(hash, self.segment_shift, self.segment_mask);
        &self.segments[idx]
    }

    pub(crate) fn spread_hash(raw: u64) -> u32 {
        spread(raw)
    }

    // ---- reads -----------------------------------------------------------

    pub(crate) fn get(&self, hash: u32, matches: impl Fn(&KeyGuard<K>) -> bool) -> GetOutcome<V> {
        self.segment_for(hash).get(hash, matches)
    }

    pub(crate) fn contains_key(&self, hash: u32, matches: impl Fn(&KeyGuard<K>) -> bool) -> bool {
        self.segment_for(hash).contains_key(hash, matches)
    }

    /// Best-effort across segments: each segment is scanned under its own
    /// lock, but segments are not locked atomically relative to one
    /// another, so this retries up to `CONTAINS_VALUE_RETRIES` times,
    /// bracketing each full pass with a cross-segment mod-count sum to
    /// detect concurrent mutation (spec §4.6).
    pub(crate) fn contains_value(&self, matches_value: impl Fn(&V) -> bool) -> bool {
        for _ in 0..CONTAINS_VALUE_RETRIES {
            let before = self.total_mod_count();
            for segment in &self.segments {
                if segment.contains_value(&matches_value) {
                    return true;
                }
            }
            let after = self.total_mod_count();
            if before == after {
                return false;
            }
        }
        self.segments.iter().any(|s| s.contains_value(&matches_value))
    }

    fn total_mod_count(&self) -> u64 {
        self.segments.iter().map(|s| s.mod_count()).sum()
    }

    pub(crate) fn size(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Two-pass check mirroring `java.util.concurrent.ConcurrentHashMap`'s
    /// `isEmpty()`: if the summed counts are zero on two passes with no
    /// intervening modification, the map was empty throughout (spec
    /// §4.6 Non-goal list explicitly allows this approach).
    pub(crate) fn is_empty(&self) -> bool {
        if self.size() != 0 {
            return false;
        }
        let before = self.total_mod_count();
        if self.size() != 0 {
            return false;
        }
        let after = self.total_mod_count();
        before == after
    }

    pub(crate) fn snapshot(&self) -> Vec<(Arc<K>, Arc<V>)> {
        self.segments.iter().flat_map(|s| s.snapshot()).collect()
    }

    // ---- writes ------------------------------------------------------------

    pub(crate) fn put(
        &self,
        hash: u32,
        key_source: KeySource<K>,
        matches: impl Fn(&KeyGuard<K>) -> bool,
        value_source: ValueSource<V>,
        if_absent: bool,
    ) -> PutOutcome<V> {
        self.segment_for(hash)
            .put(hash, key_source, matches, value_source, if_absent)
    }

    pub(crate) fn remove(&self, hash: u32, matches: impl Fn(&KeyGuard<K>) -> bool) -> Option<Arc<V>> {
        self.segment_for(hash).remove(hash, matches)
    }

    pub(crate) fn remove_if(
        &self,
        hash: u32,
        matches_key: impl Fn(&KeyGuard<K>) -> bool,
        matches_value: impl Fn(&V) -> bool,
    ) -> bool {
        self.segment_for(hash).remove_if(hash, matches_key, matches_value)
    }

    pub(crate) fn replace_if_present(
        &self,
        hash: u32,
        matches: impl Fn(&KeyGuard<K>) -> bool,
        value_source: ValueSource<V>,
        key_for_notify: impl FnOnce() -> Arc<K>,
    ) -> Option<Arc<V>> {
        self.segment_for(hash)
            .replace_if_present(hash, matches, value_source, key_for_notify)
    }

    pub(crate) fn replace_cas(
        &self,
        hash: u32,
        matches_key: impl Fn(&KeyGuard<K>) -> bool,
        matches_old: impl Fn(&V) -> bool,
        value_source: ValueSource<V>,
        key_for_notify: impl FnOnce() -> Arc<K>,
    ) -> bool {
        self.segment_for(hash)
            .replace_cas(hash, matches_key, matches_old, value_source, key_for_notify)
    }

    pub(crate) fn clear(&self) {
        for segment in &self.segments {
            segment.clear();
        }
    }

    pub(crate) fn begin_load(
        &self,
        hash: u32,
        key_source: KeySource<K>,
        matches: impl Fn(&KeyGuard<K>) -> bool,
    ) -> LoadBegin<V> {
        self.segment_for(hash).begin_load(hash, key_source, matches)
    }

    pub(crate) fn publish_loaded(&self, hash: u32, slot_index: usize, generation: u64, value: V) -> Arc<V> {
        self.segment_for(hash).publish_loaded(slot_index, generation, value)
    }

    pub(crate) fn abandon_loading(&self, hash: u32, slot_index: usize, generation: u64) {
        self.segment_for(hash).abandon_loading(slot_index, generation)
    }
}
