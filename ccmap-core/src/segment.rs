//! # Segment
//!
//! The core of the core: a hash table with a re-entrant-free exclusive
//! write path, a volatile `count`, a power-of-two bucket array, and
//! whatever combination of eviction/expiration/reclamation machinery its
//! owning `Map` enabled.
//!
//! Entries live in a per-segment arena (`Vec<Option<Entry<K, V>>>`)
//! addressed by index. Readers take the segment's `RwLock` in shared mode
//! rather than truly lock-free traversal - see DESIGN.md for why this is
//! a deliberate, documented simplification of the source's lock-free
//! reads, not an oversight. Recency tracking stays genuinely lock-free:
//! readers push onto `RecencyBuffer` without taking any lock at all, and
//! only the write-lock holder folds those samples back into the LRU
//! deque.
//!
//! `Segment` does not know its owning map's key/value strength or
//! equivalence strategy directly - those are baked into the `matches`
//! closures and `KeySource`/`ValueSource` values the caller (`Map`)
//! passes in. This keeps the segment itself generic over exactly one
//! thing: arena and lock bookkeeping.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use ccmap_common::{CcmapError, Clock, RemovalCause};

use crate::deque::{Deque, DequeKind};
use crate::entry::{Entry, NO_EXPIRATION};
use crate::hashing::bucket_index;
use crate::key_ref::{KeyGuard, KeyRef};
use crate::loader::LoadingSlot;
use crate::notifier::RemovalNotifier;
use crate::owner::{Owner, ReclaimSignal, ReclaimToken, RefKind};
use crate::recency::RecencyBuffer;
use crate::reclamation::ReclaimQueue;
use crate::stats::CacheStats;
use crate::value_ref::{ValuePeek, ValueRef};

/// Drain recency after this many reads without an intervening write. Must
/// be `2^n - 1` so it doubles as a cheap bitmask.
const DRAIN_THRESHOLD: u64 = 0x3F;
const MAXIMUM_CAPACITY: usize = 1 << 30;

/// Source of a key being inserted; which variant is legal depends on the
/// owning map's configured key strength.
pub(crate) enum KeySource<K> {
    Strong(K),
    Weak(Owner<K>),
}

impl<K: Clone> KeySource<K> {
    fn to_arc_for_notification(&self) -> Arc<K> {
        match self {
            KeySource::Strong(k) => Arc::new(k.clone()),
            KeySource::Weak(owner) => Arc::new(owner.get().clone()),
        }
    }
}

/// Source of a value being inserted; mirrors `KeySource`.
pub(crate) enum ValueSource<V> {
    Strong(V),
    Weak(Owner<V>),
    Soft(Owner<V>),
}

impl<V: Clone> ValueSource<V> {
    fn to_arc_for_notification(&self) -> Arc<V> {
        match self {
            ValueSource::Strong(v) => Arc::new(v.clone()),
            ValueSource::Weak(owner) => Arc::new(owner.get().clone()),
            ValueSource::Soft(owner) => Arc::new(owner.get().clone()),
        }
    }
}

pub(crate) enum GetOutcome<V> {
    Present(Arc<V>),
    Absent,
    Loading(Arc<LoadingSlot<V>>),
}

pub(crate) enum PutOutcome<V> {
    Inserted,
    Replaced(Arc<V>),
    ReinstatedCollected,
}

pub(crate) enum LoadBegin<V> {
    AlreadyPresent(Arc<V>),
    InProgress(Arc<LoadingSlot<V>>),
    Started {
        slot: Arc<LoadingSlot<V>>,
        slot_index: usize,
        generation: u64,
    },
}

/// Everything mutated exclusively under the segment's write lock.
struct SegmentState<K, V> {
    table: Vec<Option<usize>>,
    nodes: Vec<Option<Entry<K, V>>>,
    generations: Vec<u64>,
    free: Vec<usize>,
    access: Deque,
    write: Deque,
    threshold: usize,
}

impl<K, V> SegmentState<K, V> {
    /// `initial_table_len` is rounded up to a power of two (`bucket_index`
    /// requires it) with a floor of 2, matching spec §6's
    /// `initial_capacity` hint applied per-segment.
    fn new(initial_table_len: usize) -> Self {
        let table_len = initial_table_len.next_power_of_two().max(2);
        SegmentState {
            table: vec![None; table_len],
            nodes: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            access: Deque::default(),
            write: Deque::default(),
            threshold: (table_len * 3) / 4,
        }
    }

    /// Stores `entry` in a recycled or fresh arena slot and returns its
    /// index. The slot's generation counter is authoritative in
    /// `self.generations`, not on the entry itself - a freed slot's
    /// generation was already bumped by `free_slot`, and `entry.generation`
    /// is overwritten here to match it.
    fn allocate(&mut self, mut entry: Entry<K, V>) -> usize {
        if let Some(idx) = self.free.pop() {
            entry.generation = self.generations[idx];
            self.nodes[idx] = Some(entry);
            idx
        } else {
            self.generations.push(0);
            entry.generation = 0;
            self.nodes.push(Some(entry));
            self.nodes.len() - 1
        }
    }

    fn free_slot(&mut self, idx: usize) {
        self.nodes[idx] = None;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free.push(idx);
    }

    fn find(&self, hash: u32, matches: &dyn Fn(&KeyGuard<K>) -> bool) -> Option<usize> {
        let bucket = bucket_index(hash, self.table.len());
        let mut cursor = self.table[bucket];
        while let Some(idx) = cursor {
            let entry = self.nodes[idx].as_ref().expect("chain entry present");
            if entry.hash == hash {
                if let Some(guard) = entry.key.get() {
                    if matches(&guard) {
                        return Some(idx);
                    }
                }
            }
            cursor = entry.next_in_bucket;
        }
        None
    }

    /// Splices `idx` out of its bucket chain and both deques. Does not
    /// free the slot - the caller decides whether to recycle it.
    fn unlink(&mut self, idx: usize) {
        let hash = self.nodes[idx].as_ref().expect("entry present").hash;
        let bucket = bucket_index(hash, self.table.len());

        let mut prev: Option<usize> = None;
        let mut cursor = self.table[bucket];
        while let Some(cur) = cursor {
            if cur == idx {
                let next = self.nodes[cur].as_ref().unwrap().next_in_bucket;
                match prev {
                    Some(p) => self.nodes[p].as_mut().unwrap().next_in_bucket = next,
                    None => self.table[bucket] = next,
                }
                break;
            }
            prev = Some(cur);
            cursor = self.nodes[cur].as_ref().unwrap().next_in_bucket;
        }

        self.access.remove(&mut self.nodes, DequeKind::Access, idx);
        self.write.remove(&mut self.nodes, DequeKind::Write, idx);
    }
}

/// Everything about a segment's behavior that does not depend on `K`/`V`.
pub(crate) struct SegmentConfig {
    pub initial_table_len: usize,
    pub evicts_by_size: bool,
    pub expires: bool,
    pub max_entries: Option<u64>,
    pub expire_after_write_nanos: Option<i64>,
    pub expire_after_access_nanos: Option<i64>,
    pub clock: Arc<dyn Clock>,
}

impl SegmentConfig {
    fn write_expiration(&self, now: i64) -> i64 {
        if !self.expires {
            return NO_EXPIRATION;
        }
        if let Some(ns) = self.expire_after_access_nanos {
            now.wrapping_add(ns)
        } else if let Some(ns) = self.expire_after_write_nanos {
            now.wrapping_add(ns)
        } else {
            NO_EXPIRATION
        }
    }
}

pub(crate) struct Segment<K, V> {
    state: RwLock<SegmentState<K, V>>,
    count: AtomicUsize,
    mod_count: AtomicU64,
    read_count: AtomicU64,
    recency: RecencyBuffer,
    key_queue: ReclaimQueue,
    value_queue: ReclaimQueue,
    config: SegmentConfig,
    notifier: Arc<RemovalNotifier<K, V>>,
    stats: Arc<CacheStats>,
}

impl<K: Clone, V: Clone> Segment<K, V> {
    pub(crate) fn new(
        config: SegmentConfig,
        notifier: Arc<RemovalNotifier<K, V>>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Segment {
            state: RwLock::new(SegmentState::new(config.initial_table_len)),
            count: AtomicUsize::new(0),
            mod_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            recency: RecencyBuffer::new(),
            key_queue: ReclaimQueue::new(),
            value_queue: ReclaimQueue::new(),
            config,
            notifier,
            stats,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn mod_count(&self) -> u64 {
        self.mod_count.load(Ordering::SeqCst)
    }

    // ---- reads ---------------------------------------------------------

    /// Reads the head, walks the chain, compares, reads the value-ref,
    /// calls `get()`. Takes a shared read-lock rather than a truly
    /// lock-free read across the whole walk; see the module doc comment.
    pub(crate) fn get(&self, hash: u32, matches: impl Fn(&KeyGuard<K>) -> bool) -> GetOutcome<V> {
        let state = self.state.read();
        let idx = match state.find(hash, &matches) {
            Some(idx) => idx,
            None => {
                drop(state);
                self.post_read_cleanup();
                return GetOutcome::Absent;
            }
        };
        let entry = state.nodes[idx].as_ref().expect("entry present");
        let now = self.config.clock.now_nanos();
        if entry.is_expired(now) {
            drop(state);
            self.post_read_cleanup();
            return GetOutcome::Absent;
        }

        let mut was_reclaimed = false;
        let outcome = match entry.value.peek() {
            ValuePeek::Present(guard) => {
                self.recency.add(idx);
                if let Some(ns) = self.config.expire_after_access_nanos {
                    entry.set_expiration(now.wrapping_add(ns));
                }
                GetOutcome::Present(guard.to_arc())
            }
            ValuePeek::Reclaimed => {
                was_reclaimed = true;
                GetOutcome::Absent
            }
            ValuePeek::Loading(slot) => GetOutcome::Loading(slot),
            ValuePeek::Unset => GetOutcome::Absent,
        };
        drop(state);

        if was_reclaimed {
            self.try_drain_reclamation();
        }
        self.post_read_cleanup();
        outcome
    }

    pub(crate) fn contains_key(&self, hash: u32, matches: impl Fn(&KeyGuard<K>) -> bool) -> bool {
        let state = self.state.read();
        let found = match state.find(hash, &matches) {
            Some(idx) => {
                let entry = state.nodes[idx].as_ref().unwrap();
                !entry.is_expired(self.config.clock.now_nanos())
                    && !entry.value.is_vacant()
                    && !entry.value.is_loading()
            }
            None => false,
        };
        drop(state);
        self.post_read_cleanup();
        found
    }

    /// Scanned entirely under the shared read lock, so (unlike the
    /// source's lock-free version) no mod-count retry dance is needed
    /// here; `Map::contains_value` still brackets its cross-segment scan
    /// with a retry, since segments are not locked atomically relative to
    /// one another.
    pub(crate) fn contains_value(&self, matches_value: impl Fn(&V) -> bool) -> bool {
        let state = self.state.read();
        let now = self.config.clock.now_nanos();
        for slot in &state.nodes {
            let Some(entry) = slot else { continue };
            if entry.is_expired(now) {
                continue;
            }
            if let ValuePeek::Present(guard) = entry.value.peek() {
                if matches_value(&guard) {
                    return true;
                }
            }
        }
        false
    }

    /// Snapshot of every live `(key, value)` pair, for iteration and
    /// `clear`'s notification pass. Weakly consistent: reflects whatever
    /// subset of concurrent mutation happened to land before the read
    /// lock was taken; never faults on concurrent modification.
    pub(crate) fn snapshot(&self) -> Vec<(Arc<K>, Arc<V>)> {
        let state = self.state.read();
        let now = self.config.clock.now_nanos();
        let mut out = Vec::new();
        for slot in &state.nodes {
            let Some(entry) = slot else { continue };
            if entry.is_expired(now) {
                continue;
            }
            let Some(key_guard) = entry.key.get() else {
                continue;
            };
            if let ValuePeek::Present(value_guard) = entry.value.peek() {
                out.push((Arc::new((*key_guard).clone()), value_guard.to_arc()));
            }
        }
        out
    }

    // ---- writes ----------------------------------------------------------

    /// Inserts or replaces `hash`/`matches`, evicting/expiring as needed.
    pub(crate) fn put(
        &self,
        hash: u32,
        key_source: KeySource<K>,
        matches: impl Fn(&KeyGuard<K>) -> bool,
        value_source: ValueSource<V>,
        if_absent: bool,
    ) -> PutOutcome<V> {
        let mut state = self.state.write();
        self.pre_write_cleanup(&mut state);

        if let Some(0) = self.config.max_entries {
            // "null map": every put evicts the newly inserted pair instantly,
            // so an existing live entry is dropped and the pair just handed
            // in is reported SIZE-evicted rather than ever being retained.
            let key_arc = key_source.to_arc_for_notification();
            let value_arc = value_source.to_arc_for_notification();
            self.notifier.enqueue(Some(key_arc), Some(value_arc), RemovalCause::Size);
            if let Some(idx) = state.find(hash, &matches) {
                let prev = self.take_live_value(&state, idx);
                self.finish_remove(&mut state, idx, RemovalCause::Size);
                drop(state);
                self.notifier.flush();
                return match prev {
                    Some(v) => PutOutcome::Replaced(v),
                    None => PutOutcome::Inserted,
                };
            }
            drop(state);
            self.notifier.flush();
            return PutOutcome::Inserted;
        }

        let now = self.config.clock.now_nanos();
        if let Some(idx) = state.find(hash, &matches) {
            let entry = state.nodes[idx].as_ref().unwrap();
            let was_collected = entry.value.is_reclaimed();
            let loading_slot = match entry.value.peek() {
                ValuePeek::Loading(slot) => Some(slot),
                _ => None,
            };
            let previous = self.take_live_value(&state, idx);

            if if_absent && previous.is_some() {
                drop(state);
                self.notifier.flush();
                return PutOutcome::Replaced(previous.unwrap());
            }

            if let Some(slot) = loading_slot {
                // A direct put raced a pending computation on this key; the
                // computation is superseded rather than left to hang its
                // waiters forever (see `CcmapError::Superseded`).
                slot.publish_failure(CcmapError::Superseded);
            } else if let Some(prev) = &previous {
                let key_arc = key_source.to_arc_for_notification();
                self.notifier
                    .enqueue(Some(key_arc), Some(Arc::clone(prev)), RemovalCause::Replaced);
            }
            // `was_collected` with no listener-visible previous value: the
            // reclaimed referent can no longer be supplied to a listener,
            // so reinstatement over a collected slot fires no notification.
            let _ = was_collected;

            let gen = state.generations[idx];
            let value_ref = self.build_value_ref(value_source, idx, gen);
            let entry = state.nodes[idx].as_mut().unwrap();
            entry.value = value_ref;
            entry.set_expiration(self.config.write_expiration(now));
            if self.config.evicts_by_size {
                state.access.offer(&mut state.nodes, DequeKind::Access, idx);
            }
            if self.config.expires {
                state.write.offer(&mut state.nodes, DequeKind::Write, idx);
            }
            self.mod_count.fetch_add(1, Ordering::SeqCst);
            if previous.is_none() {
                self.count.fetch_add(1, Ordering::SeqCst);
            }

            drop(state);
            self.notifier.flush();
            return match previous {
                Some(v) => PutOutcome::Replaced(v),
                None => PutOutcome::ReinstatedCollected,
            };
        }

        // No existing chain entry: create a new head.
        if self.count.load(Ordering::SeqCst) + 1 > state.threshold {
            self.expand(&mut state);
        }

        let key_ref = match &key_source {
            KeySource::Strong(k) => KeyRef::strong(k.clone()),
            KeySource::Weak(owner) => KeyRef::weak(owner),
        };
        let mut entry = Entry::fresh(key_ref, hash, 0);
        entry.set_expiration(self.config.write_expiration(now));

        let bucket = bucket_index(hash, state.table.len());
        entry.next_in_bucket = state.table[bucket];
        let idx = state.allocate(entry);
        state.table[bucket] = Some(idx);
        let gen = state.generations[idx];

        if let KeySource::Weak(owner) = &key_source {
            owner.bind(ReclaimToken::new(self.key_queue.handle(), idx, gen, RefKind::Key));
        }

        let value_ref = self.build_value_ref(value_source, idx, gen);
        state.nodes[idx].as_mut().unwrap().value = value_ref;

        if self.config.evicts_by_size {
            state.access.push_back(&mut state.nodes, DequeKind::Access, idx);
        }
        if self.config.expires {
            state.write.push_back(&mut state.nodes, DequeKind::Write, idx);
        }

        self.mod_count.fetch_add(1, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);

        if self.config.evicts_by_size {
            if let Some(max) = self.config.max_entries {
                while self.count.load(Ordering::SeqCst) as u64 > max {
                    let Some(victim) = state.access.peek_front() else {
                        break;
                    };
                    self.evict_one(&mut state, victim, RemovalCause::Size);
                }
            }
        }

        drop(state);
        self.notifier.flush();
        PutOutcome::Inserted
    }

    /// Removes `idx` and, if it was carrying a live key/value pair,
    /// enqueues a removal notification for it before the slot is freed
    /// and its contents become unreachable.
    fn evict_one(&self, state: &mut SegmentState<K, V>, idx: usize, cause: RemovalCause) {
        let entry = state.nodes[idx].as_ref().expect("entry present");
        let key_guard = entry.key.get();
        let value = match entry.value.peek() {
            ValuePeek::Present(g) => Some(g.to_arc()),
            _ => None,
        };
        match (key_guard, value) {
            (Some(kg), Some(v)) => {
                let key_arc = Arc::new((*kg).clone());
                self.finish_remove(state, idx, cause);
                self.notifier.enqueue(Some(key_arc), Some(v), cause);
            }
            _ => self.finish_remove(state, idx, cause),
        }
    }

    /// `remove(k,h)`. Returns the previous value, if the key was live.
    pub(crate) fn remove(
        &self,
        hash: u32,
        matches: impl Fn(&KeyGuard<K>) -> bool,
    ) -> Option<Arc<V>> {
        let mut state = self.state.write();
        self.pre_write_cleanup(&mut state);

        let idx = state.find(hash, &matches)?;
        if let ValuePeek::Loading(slot) = state.nodes[idx].as_ref().unwrap().value.peek() {
            slot.publish_failure(CcmapError::Superseded);
        }
        let previous = self.take_live_value(&state, idx);
        self.finish_remove(&mut state, idx, RemovalCause::Explicit);
        drop(state);
        self.notifier.flush();
        previous
    }

    /// `remove(k,v)`: CAS-style removal. `matches_value` compares the live
    /// value against the caller's expected one using whichever
    /// value-equivalence strategy the owning map configured.
    pub(crate) fn remove_if(
        &self,
        hash: u32,
        matches_key: impl Fn(&KeyGuard<K>) -> bool,
        matches_value: impl Fn(&V) -> bool,
    ) -> bool {
        let mut state = self.state.write();
        self.pre_write_cleanup(&mut state);

        let Some(idx) = state.find(hash, &matches_key) else {
            return false;
        };
        let entry = state.nodes[idx].as_ref().unwrap();
        let live_matches = match entry.value.peek() {
            ValuePeek::Present(guard) => matches_value(&guard),
            _ => false,
        };
        if !live_matches {
            return false;
        }
        self.finish_remove(&mut state, idx, RemovalCause::Explicit);
        drop(state);
        self.notifier.flush();
        true
    }

    /// `replace(k,v)`: replace only if a live value is currently present.
    pub(crate) fn replace_if_present(
        &self,
        hash: u32,
        matches: impl Fn(&KeyGuard<K>) -> bool,
        value_source: ValueSource<V>,
        key_for_notify: impl FnOnce() -> Arc<K>,
    ) -> Option<Arc<V>> {
        let mut state = self.state.write();
        self.pre_write_cleanup(&mut state);

        let idx = state.find(hash, &matches)?;
        let previous = self.take_live_value(&state, idx)?;
        self.notifier
            .enqueue(Some(key_for_notify()), Some(Arc::clone(&previous)), RemovalCause::Replaced);

        let now = self.config.clock.now_nanos();
        let gen = state.generations[idx];
        let value_ref = self.build_value_ref(value_source, idx, gen);
        let entry = state.nodes[idx].as_mut().unwrap();
        entry.value = value_ref;
        entry.set_expiration(self.config.write_expiration(now));
        if self.config.evicts_by_size {
            state.access.offer(&mut state.nodes, DequeKind::Access, idx);
        }
        if self.config.expires {
            state.write.offer(&mut state.nodes, DequeKind::Write, idx);
        }
        self.mod_count.fetch_add(1, Ordering::SeqCst);

        drop(state);
        self.notifier.flush();
        Some(previous)
    }

    /// `replace(k,old,new)`: CAS-style replace.
    pub(crate) fn replace_cas(
        &self,
        hash: u32,
        matches_key: impl Fn(&KeyGuard<K>) -> bool,
        matches_old: impl Fn(&V) -> bool,
        value_source: ValueSource<V>,
        key_for_notify: impl FnOnce() -> Arc<K>,
    ) -> bool {
        let mut state = self.state.write();
        self.pre_write_cleanup(&mut state);

        let Some(idx) = state.find(hash, &matches_key) else {
            return false;
        };
        let entry = state.nodes[idx].as_ref().unwrap();
        let previous = match entry.value.peek() {
            ValuePeek::Present(guard) if matches_old(&guard) => guard.to_arc(),
            _ => return false,
        };
        self.notifier
            .enqueue(Some(key_for_notify()), Some(previous), RemovalCause::Replaced);

        let now = self.config.clock.now_nanos();
        let gen = state.generations[idx];
        let value_ref = self.build_value_ref(value_source, idx, gen);
        let entry = state.nodes[idx].as_mut().unwrap();
        entry.value = value_ref;
        entry.set_expiration(self.config.write_expiration(now));
        if self.config.evicts_by_size {
            state.access.offer(&mut state.nodes, DequeKind::Access, idx);
        }
        if self.config.expires {
            state.write.offer(&mut state.nodes, DequeKind::Write, idx);
        }
        self.mod_count.fetch_add(1, Ordering::SeqCst);

        drop(state);
        self.notifier.flush();
        true
    }

    /// Removes every live entry, notifying for each one that still has
    /// both a live key and a live value to report. Entries still
    /// `Loading` are left untouched - their computation is allowed to
    /// finish or fail on its own rather than being superseded, since a
    /// bulk `clear()` racing an in-flight load is rare enough that this
    /// port does not special-case it further.
    pub(crate) fn clear(&self) {
        let mut state = self.state.write();
        let now = self.config.clock.now_nanos();
        let indices: Vec<usize> = (0..state.nodes.len()).filter(|i| state.nodes[*i].is_some()).collect();
        for idx in indices {
            let entry = state.nodes[idx].as_ref().unwrap();
            if entry.value.is_loading() {
                continue;
            }
            let cause = if entry.is_expired(now) {
                RemovalCause::Expired
            } else {
                RemovalCause::Explicit
            };
            let key_guard = entry.key.get();
            let value = match entry.value.peek() {
                ValuePeek::Present(g) => Some(g.to_arc()),
                _ => None,
            };
            if let (Some(kg), Some(v)) = (key_guard, value) {
                let key_arc = Arc::new((*kg).clone());
                self.finish_remove(&mut state, idx, cause);
                self.notifier.enqueue(Some(key_arc), Some(v), cause);
            } else {
                self.finish_remove(&mut state, idx, RemovalCause::Collected);
            }
        }
        drop(state);
        self.notifier.flush();
    }

    // ---- loading (at-most-one-compute) ------------------------------------

    /// Installs a fresh `Loading` entry for `hash`/`matches`, or reports
    /// what is already there. Runs the loader outside the lock; the
    /// caller later calls `publish_loaded` or `abandon_loading`.
    pub(crate) fn begin_load(
        &self,
        hash: u32,
        key_source: KeySource<K>,
        matches: impl Fn(&KeyGuard<K>) -> bool,
    ) -> LoadBegin<V> {
        let mut state = self.state.write();
        self.pre_write_cleanup(&mut state);

        if let Some(idx) = state.find(hash, &matches) {
            let entry = state.nodes[idx].as_ref().unwrap();
            match entry.value.peek() {
                ValuePeek::Present(guard) => {
                    return LoadBegin::AlreadyPresent(guard.to_arc());
                }
                ValuePeek::Loading(slot) => {
                    return LoadBegin::InProgress(slot);
                }
                _ => {}
            }
            let slot = LoadingSlot::new();
            state.nodes[idx].as_mut().unwrap().value = ValueRef::Loading(Arc::clone(&slot));
            let generation = state.generations[idx];
            drop(state);
            return LoadBegin::Started {
                slot,
                slot_index: idx,
                generation,
            };
        }

        if self.count.load(Ordering::SeqCst) + 1 > state.threshold {
            self.expand(&mut state);
        }
        let key_ref = match &key_source {
            KeySource::Strong(k) => KeyRef::strong(k.clone()),
            KeySource::Weak(owner) => KeyRef::weak(owner),
        };
        let mut entry = Entry::fresh(key_ref, hash, 0);
        let slot = LoadingSlot::new();
        entry.value = ValueRef::Loading(Arc::clone(&slot));
        let bucket = bucket_index(hash, state.table.len());
        entry.next_in_bucket = state.table[bucket];
        let idx = state.allocate(entry);
        state.table[bucket] = Some(idx);
        let gen = state.generations[idx];
        if let KeySource::Weak(owner) = &key_source {
            owner.bind(ReclaimToken::new(self.key_queue.handle(), idx, gen, RefKind::Key));
        }
        self.mod_count.fetch_add(1, Ordering::SeqCst);
        drop(state);
        LoadBegin::Started {
            slot,
            slot_index: idx,
            generation: gen,
        }
    }

    /// Publishes a successful computation, preserving the same entry
    /// instance. If the slot was superseded in the meantime the value is
    /// discarded - the caller is still handed the `Arc<V>` it computed.
    pub(crate) fn publish_loaded(&self, slot_index: usize, generation: u64, value: V) -> Arc<V> {
        let mut state = self.state.write();
        let now = self.config.clock.now_nanos();
        let value_arc = Arc::new(value);
        let slot_gen = state.generations.get(slot_index).copied();
        if slot_gen != Some(generation) {
            return value_arc;
        }
        if let Some(entry) = state.nodes.get_mut(slot_index).and_then(|s| s.as_mut()) {
            if entry.value.is_loading() {
                entry.value = ValueRef::Strong(Arc::clone(&value_arc));
                entry.set_expiration(self.config.write_expiration(now));
                self.count.fetch_add(1, Ordering::SeqCst);
                if self.config.evicts_by_size {
                    state
                        .access
                        .offer(&mut state.nodes, DequeKind::Access, slot_index);
                }
                if self.config.expires {
                    state
                        .write
                        .offer(&mut state.nodes, DequeKind::Write, slot_index);
                }
            }
        }
        value_arc
    }

    /// Removes the loading entry after a computation failure.
    pub(crate) fn abandon_loading(&self, slot_index: usize, generation: u64) {
        let mut state = self.state.write();
        if state.generations.get(slot_index).copied() != Some(generation) {
            return;
        }
        let still_loading = state
            .nodes
            .get(slot_index)
            .and_then(|s| s.as_ref())
            .map(|e| e.value.is_loading())
            .unwrap_or(false);
        if still_loading {
            self.finish_remove(&mut state, slot_index, RemovalCause::ExpiredOnLoad);
        }
    }

    // ---- cleanup protocol --------------------------------------------------

    fn post_read_cleanup(&self) {
        let prior = self.read_count.fetch_add(1, Ordering::Relaxed);
        if (prior + 1) & DRAIN_THRESHOLD == 0 {
            self.run_cleanup();
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn run_cleanup(&self) {
        if let Some(mut state) = self.state.try_write() {
            self.pre_write_cleanup(&mut state);
        }
        self.notifier.flush();
    }

    /// Drains reclamation, expires entries, drains recency - all under
    /// the already-held write lock.
    fn pre_write_cleanup(&self, state: &mut SegmentState<K, V>) {
        self.drain_reclamation_locked(state, RefKind::Key);
        self.drain_reclamation_locked(state, RefKind::Value);
        self.expire_entries(state);
        self.recency.drain_into(&mut state.nodes, &mut state.access);
        self.read_count.store(0, Ordering::Relaxed);
    }

    fn try_drain_reclamation(&self) {
        if self.key_queue.is_empty() && self.value_queue.is_empty() {
            return;
        }
        if let Some(mut state) = self.state.try_write() {
            self.drain_reclamation_locked(&mut state, RefKind::Key);
            self.drain_reclamation_locked(&mut state, RefKind::Value);
        }
    }

    fn drain_reclamation_locked(&self, state: &mut SegmentState<K, V>, kind: RefKind) {
        let queue = match kind {
            RefKind::Key => &self.key_queue,
            RefKind::Value => &self.value_queue,
        };
        let mut signals = Vec::new();
        queue.drain(|signal| signals.push(signal));
        for signal in signals {
            self.reclaim_signal(state, signal);
        }
    }

    /// Acts on one reclamation signal, guarding against acting twice on
    /// the same event and against a stale signal whose arena slot was
    /// already recycled for an unrelated entry.
    ///
    /// The reclaimed side's referent is gone by construction, so the
    /// listener is handed `None` for that side and whatever is still
    /// live (if anything) for the other.
    fn reclaim_signal(&self, state: &mut SegmentState<K, V>, signal: ReclaimSignal) {
        let Some(slot_gen) = state.generations.get(signal.slot).copied() else {
            return;
        };
        if slot_gen != signal.generation {
            return;
        }
        let Some(entry) = state.nodes.get(signal.slot).and_then(|s| s.as_ref()) else {
            return;
        };
        let still_applies = match signal.kind {
            RefKind::Key => entry.key.is_reclaimed(),
            RefKind::Value => entry.value.is_reclaimed(),
        };
        if !still_applies {
            return;
        }

        let (key_arc, value_arc) = match signal.kind {
            RefKind::Key => {
                let value = match entry.value.peek() {
                    ValuePeek::Present(g) => Some(g.to_arc()),
                    _ => None,
                };
                (None, value)
            }
            RefKind::Value => {
                let key = entry.key.get().map(|kg| Arc::new((*kg).clone()));
                (key, None)
            }
        };

        self.finish_remove(state, signal.slot, RemovalCause::Collected);
        if key_arc.is_some() || value_arc.is_some() {
            self.notifier.enqueue(key_arc, value_arc, RemovalCause::Collected);
        }
    }

    /// Walks the write-order deque's head, removing entries whose
    /// `expiration_time` has elapsed.
    #[tracing::instrument(level = "trace", skip_all)]
    fn expire_entries(&self, state: &mut SegmentState<K, V>) {
        if !self.config.expires {
            return;
        }
        let now = self.config.clock.now_nanos();
        loop {
            let Some(idx) = state.write.peek_front() else {
                break;
            };
            let expired = state.nodes[idx]
                .as_ref()
                .map(|e| e.is_expired(now))
                .unwrap_or(false);
            if !expired {
                break;
            }
            let entry = state.nodes[idx].as_ref().unwrap();
            let cause = if entry.value.is_loading() {
                RemovalCause::ExpiredOnLoad
            } else {
                RemovalCause::Expired
            };
            self.evict_one(state, idx, cause);
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn expand(&self, state: &mut SegmentState<K, V>) {
        let new_len = (state.table.len() * 2).min(MAXIMUM_CAPACITY);
        if new_len == state.table.len() {
            return;
        }
        let mut new_table = vec![None; new_len];
        for bucket in 0..state.table.len() {
            let mut cursor = state.table[bucket];
            while let Some(idx) = cursor {
                let entry = state.nodes[idx].as_ref().unwrap();
                let next = entry.next_in_bucket;
                if entry.key.is_reclaimed() || entry.value.is_reclaimed() {
                    state.unlink(idx);
                    state.free_slot(idx);
                    let prev = self.count.load(Ordering::SeqCst);
                    if prev > 0 {
                        self.count.fetch_sub(1, Ordering::SeqCst);
                    }
                } else {
                    let new_bucket = bucket_index(entry.hash, new_len);
                    let head = new_table[new_bucket];
                    state.nodes[idx].as_mut().unwrap().next_in_bucket = head;
                    new_table[new_bucket] = Some(idx);
                }
                cursor = next;
            }
        }
        state.table = new_table;
        state.threshold = (new_len * 3) / 4;
    }

    fn take_live_value(&self, state: &SegmentState<K, V>, idx: usize) -> Option<Arc<V>> {
        let entry = state.nodes[idx].as_ref()?;
        match entry.value.peek() {
            ValuePeek::Present(guard) => Some(guard.to_arc()),
            _ => None,
        }
    }

    fn finish_remove(&self, state: &mut SegmentState<K, V>, idx: usize, cause: RemovalCause) {
        let was_live = state.nodes[idx]
            .as_ref()
            .map(|e| !e.value.is_vacant() && !e.value.is_loading())
            .unwrap_or(false);
        state.unlink(idx);
        state.free_slot(idx);
        self.mod_count.fetch_add(1, Ordering::SeqCst);
        if was_live {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        if cause.is_evicting() {
            self.stats.record_eviction();
        }
    }

    fn build_value_ref(&self, source: ValueSource<V>, idx: usize, generation: u64) -> ValueRef<V> {
        match source {
            ValueSource::Strong(v) => ValueRef::strong(v),
            ValueSource::Weak(owner) => {
                owner.bind(ReclaimToken::new(self.value_queue.handle(), idx, generation, RefKind::Value));
                ValueRef::weak(&owner)
            }
            ValueSource::Soft(owner) => {
                owner.bind(ReclaimToken::new(self.value_queue.handle(), idx, generation, RefKind::Value));
                ValueRef::soft(&owner)
            }
        }
    }
}
