//! # Cache
//!
//! Purpose: the public, typed facade over `Map`/`Segment`. `Map` and
//! `Segment` only know about hashes, `KeySource`/`ValueSource`, and
//! `matches` closures; `Cache` is where `KeyStrength`/`ValueStrength`/
//! `Equivalence` turn into those closures.
//!
//! Strong keys and values get the full surface: `get`, `get_or_load`,
//! `put`, `put_if_absent`, `replace`, `replace_cas`, `remove`, `remove_if`,
//! plus the read-only views. Weak keys and weak/soft values need a caller-
//! retained `Owner` handle to mean anything, so they get a parallel,
//! smaller `_owned` surface instead of silently reinterpreting a bare
//! `K`/`V`.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ccmap_common::{CcmapError, CcmapResult, Clock, Equivalence, KeyStrength, ValueStrength};

use crate::key_ref::KeyGuard;
use crate::loader::time_loader;
use crate::map::{Map, MapConfig};
use crate::notifier::{Listener, RemovalNotifier};
use crate::owner::Owner;
use crate::segment::{GetOutcome, KeySource, LoadBegin, PutOutcome, ValueSource};
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// A single `(key, value)` pair read out of the cache, returned by the
/// read-only `iterate` view.
pub struct EntryView<K, V> {
    key: Arc<K>,
    value: Arc<V>,
}

impl<K, V> EntryView<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> Arc<V> {
        self.value
    }
}

/// A concurrent, in-process associative map with optional size- and
/// time-based eviction. Construct one with [`CacheBuilder`](crate::CacheBuilder).
pub struct Cache<K, V> {
    map: Map<K, V>,
    key_strength: KeyStrength,
    value_strength: ValueStrength,
    key_equivalence: Arc<dyn Equivalence<K>>,
    value_equivalence: Arc<dyn Equivalence<V>>,
    stats: Arc<CacheStats>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Eq + Hash + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_builder(
        segment_count: usize,
        initial_capacity: usize,
        maximum_size: Option<u64>,
        expire_after_write: Option<Duration>,
        expire_after_access: Option<Duration>,
        key_strength: KeyStrength,
        value_strength: ValueStrength,
        key_equivalence: Arc<dyn Equivalence<K>>,
        value_equivalence: Arc<dyn Equivalence<V>>,
        removal_listener: Option<Listener<K, V>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let notifier = Arc::new(RemovalNotifier::new(removal_listener));
        let stats = Arc::new(CacheStats::default());
        let map_config = MapConfig {
            segment_count,
            initial_capacity,
            evicts_by_size: maximum_size.is_some(),
            total_max_entries: maximum_size,
            expires: expire_after_write.is_some() || expire_after_access.is_some(),
            expire_after_write_nanos: expire_after_write.map(|d| d.as_nanos() as i64),
            expire_after_access_nanos: expire_after_access.map(|d| d.as_nanos() as i64),
            clock,
        };
        Cache {
            map: Map::new(map_config, notifier, Arc::clone(&stats)),
            key_strength,
            value_strength,
            key_equivalence,
            value_equivalence,
            stats,
        }
    }

    fn hash_strong(&self, key: &K) -> u32 {
        let raw = self.key_equivalence.hash_of(key);
        Map::<K, V>::spread_hash(raw)
    }

    fn hash_owner(&self, owner: &Owner<K>) -> u32 {
        let ptr = Arc::as_ptr(&owner.inner_arc()) as usize;
        Map::<K, V>::spread_hash(ptr as u64)
    }

    fn owner_matches(guard: &KeyGuard<K>, owner: &Owner<K>) -> bool {
        match guard {
            KeyGuard::Weak(inner) => Arc::ptr_eq(inner, &owner.inner_arc()),
            KeyGuard::Strong(_) => false,
        }
    }

    fn key_matches(&self, key: &K) -> impl Fn(&KeyGuard<K>) -> bool + '_ {
        move |guard: &KeyGuard<K>| self.key_equivalence.equivalent(guard, key)
    }

    fn require_strong_key(&self, what: &str) -> CcmapResult<()> {
        if self.key_strength != KeyStrength::Strong {
            return Err(CcmapError::InvalidConfig(format!(
                "{what} requires a Strong-keyed cache; use the _owned family"
            )));
        }
        Ok(())
    }

    fn require_strong_value(&self, what: &str) -> CcmapResult<()> {
        if self.value_strength != ValueStrength::Strong {
            return Err(CcmapError::InvalidConfig(format!(
                "{what} requires a Strong-valued cache; use put_value_owned"
            )));
        }
        Ok(())
    }

    // ---- reads -------------------------------------------------------------

    /// Looks up `key`, never blocking even if a `get_or_load` computation
    /// for it is in flight (an in-progress load reads as absent here).
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if self.key_strength != KeyStrength::Strong {
            return None;
        }
        let hash = self.hash_strong(key);
        match self.map.get(hash, self.key_matches(key)) {
            GetOutcome::Present(value) => {
                self.stats.record_hit();
                Some(value)
            }
            GetOutcome::Absent | GetOutcome::Loading(_) => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        if self.key_strength != KeyStrength::Strong {
            return false;
        }
        let hash = self.hash_strong(key);
        self.map.contains_key(hash, self.key_matches(key))
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.map
            .contains_value(|v: &V| self.value_equivalence.equivalent(v, value))
    }

    pub fn size(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// A weakly-consistent snapshot: reflects the map's state at some
    /// point during the call, not necessarily a single instant.
    pub fn iterate(&self) -> impl Iterator<Item = EntryView<K, V>> {
        self.map
            .snapshot()
            .into_iter()
            .map(|(key, value)| EntryView { key, value })
    }

    pub fn key_view(&self) -> Vec<Arc<K>> {
        self.map.snapshot().into_iter().map(|(k, _)| k).collect()
    }

    pub fn value_view(&self) -> Vec<Arc<V>> {
        self.map.snapshot().into_iter().map(|(_, v)| v).collect()
    }

    // ---- writes (Strong keys, Strong values) --------------------------------

    pub fn put(&self, key: K, value: V) -> CcmapResult<Option<Arc<V>>> {
        self.require_strong_key("put")?;
        self.require_strong_value("put")?;
        let hash = self.hash_strong(&key);
        let matches = self.key_matches(&key);
        let outcome = self
            .map
            .put(hash, KeySource::Strong(key), matches, ValueSource::Strong(value), false);
        Ok(Self::previous_of(outcome))
    }

    pub fn put_if_absent(&self, key: K, value: V) -> CcmapResult<Option<Arc<V>>> {
        self.require_strong_key("put_if_absent")?;
        self.require_strong_value("put_if_absent")?;
        let hash = self.hash_strong(&key);
        let matches = self.key_matches(&key);
        let outcome = self
            .map
            .put(hash, KeySource::Strong(key), matches, ValueSource::Strong(value), true);
        Ok(Self::previous_of(outcome))
    }

    fn previous_of(outcome: PutOutcome<V>) -> Option<Arc<V>> {
        match outcome {
            PutOutcome::Replaced(previous) => Some(previous),
            PutOutcome::Inserted | PutOutcome::ReinstatedCollected => None,
        }
    }

    pub fn replace(&self, key: &K, value: V) -> CcmapResult<Option<Arc<V>>> {
        self.require_strong_key("replace")?;
        self.require_strong_value("replace")?;
        let hash = self.hash_strong(key);
        let matches = self.key_matches(key);
        let key_for_notify = {
            let key = key.clone();
            move || Arc::new(key)
        };
        Ok(self
            .map
            .replace_if_present(hash, matches, ValueSource::Strong(value), key_for_notify))
    }

    pub fn replace_cas(&self, key: &K, old_value: &V, new_value: V) -> CcmapResult<bool> {
        self.require_strong_key("replace_cas")?;
        self.require_strong_value("replace_cas")?;
        let hash = self.hash_strong(key);
        let matches_key = self.key_matches(key);
        let value_equivalence = Arc::clone(&self.value_equivalence);
        let old_value = old_value.clone();
        let matches_old = move |v: &V| value_equivalence.equivalent(v, &old_value);
        let key_for_notify = {
            let key = key.clone();
            move || Arc::new(key)
        };
        Ok(self
            .map
            .replace_cas(hash, matches_key, matches_old, ValueSource::Strong(new_value), key_for_notify))
    }

    pub fn remove(&self, key: &K) -> CcmapResult<Option<Arc<V>>> {
        self.require_strong_key("remove")?;
        let hash = self.hash_strong(key);
        Ok(self.map.remove(hash, self.key_matches(key)))
    }

    pub fn remove_if(&self, key: &K, expected_value: &V) -> CcmapResult<bool> {
        self.require_strong_key("remove_if")?;
        let hash = self.hash_strong(key);
        let matches_key = self.key_matches(key);
        let value_equivalence = Arc::clone(&self.value_equivalence);
        let expected_value = expected_value.clone();
        let matches_value = move |v: &V| value_equivalence.equivalent(v, &expected_value);
        Ok(self.map.remove_if(hash, matches_key, matches_value))
    }

    /// Loads and caches `key` if absent, with at-most-one concurrent
    /// computation per key. Blocks the calling thread if another caller's
    /// load for the same key is already in flight.
    ///
    /// A loader returning `Ok(None)` is treated as `LoaderReturnedNull`:
    /// the failure is delivered to every waiter and the key is left
    /// absent, exactly as a raised loader error would be.
    #[tracing::instrument(level = "trace", skip(self, key, loader))]
    pub fn get_or_load<E>(
        &self,
        key: &K,
        loader: impl Fn(&K) -> Result<Option<V>, E>,
    ) -> CcmapResult<Arc<V>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.require_strong_key("get_or_load")?;
        self.require_strong_value("get_or_load")?;
        let hash = self.hash_strong(key);
        let matches = self.key_matches(key);
        match self.map.begin_load(hash, KeySource::Strong(key.clone()), matches) {
            LoadBegin::AlreadyPresent(value) => {
                self.stats.record_hit();
                Ok(value)
            }
            LoadBegin::InProgress(slot) => {
                let result = slot.wait_for_value();
                match &result {
                    Ok(_) => self.stats.record_hit(),
                    Err(_) => self.stats.record_miss(),
                }
                result
            }
            LoadBegin::Started {
                slot,
                slot_index,
                generation,
            } => {
                self.stats.record_miss();
                let (outcome, elapsed) = time_loader(&loader, key);
                match outcome {
                    Ok(Some(value)) => {
                        let arc = self.map.publish_loaded(hash, slot_index, generation, value);
                        slot.publish_success(Arc::clone(&arc));
                        self.stats.record_load_success(elapsed);
                        Ok(arc)
                    }
                    Ok(None) => {
                        self.map.abandon_loading(hash, slot_index, generation);
                        let wrapped = CcmapError::LoaderReturnedNull;
                        slot.publish_failure(wrapped.clone());
                        self.stats.record_load_failure(elapsed);
                        Err(wrapped)
                    }
                    Err(err) => {
                        self.map.abandon_loading(hash, slot_index, generation);
                        let wrapped = CcmapError::computation_failed(err);
                        slot.publish_failure(wrapped.clone());
                        self.stats.record_load_failure(elapsed);
                        Err(wrapped)
                    }
                }
            }
        }
    }

    // ---- writes (Strong key, Weak/Soft value) -------------------------------

    /// Inserts a weakly or softly held value under a `Strong` key. The
    /// returned `Arc<V>` (if any previous value is reported) is a
    /// materialized clone, not the original `Owner`'s referent.
    pub fn put_value_owned(&self, key: K, value: Owner<V>) -> CcmapResult<Option<Arc<V>>> {
        self.require_strong_key("put_value_owned")?;
        if self.value_strength == ValueStrength::Strong {
            return Err(CcmapError::InvalidConfig(
                "cache is configured for Strong values; use put".into(),
            ));
        }
        let hash = self.hash_strong(&key);
        let matches = self.key_matches(&key);
        let value_source = match self.value_strength {
            ValueStrength::Weak => ValueSource::Weak(value),
            ValueStrength::Soft => ValueSource::Soft(value),
            ValueStrength::Strong => unreachable!("checked above"),
        };
        let outcome = self.map.put(hash, KeySource::Strong(key), matches, value_source, false);
        Ok(Self::previous_of(outcome))
    }

    // ---- writes (Weak keys, via caller-retained Owner<K>) -------------------

    pub fn get_owned(&self, owner: &Owner<K>) -> Option<Arc<V>> {
        if self.key_strength != KeyStrength::Weak {
            return None;
        }
        let hash = self.hash_owner(owner);
        match self.map.get(hash, |g| Self::owner_matches(g, owner)) {
            GetOutcome::Present(value) => {
                self.stats.record_hit();
                Some(value)
            }
            GetOutcome::Absent | GetOutcome::Loading(_) => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub fn contains_key_owned(&self, owner: &Owner<K>) -> bool {
        if self.key_strength != KeyStrength::Weak {
            return false;
        }
        let hash = self.hash_owner(owner);
        self.map.contains_key(hash, |g| Self::owner_matches(g, owner))
    }

    pub fn put_owned(&self, owner: Owner<K>, value: V) -> CcmapResult<Option<Arc<V>>> {
        if self.key_strength != KeyStrength::Weak {
            return Err(CcmapError::InvalidConfig(
                "put_owned requires a Weak-keyed cache; use put".into(),
            ));
        }
        self.require_strong_value("put_owned")?;
        let hash = self.hash_owner(&owner);
        let matches = {
            let owner = owner.clone();
            move |g: &KeyGuard<K>| Self::owner_matches(g, &owner)
        };
        let outcome = self
            .map
            .put(hash, KeySource::Weak(owner), matches, ValueSource::Strong(value), false);
        Ok(Self::previous_of(outcome))
    }

    pub fn remove_owned(&self, owner: &Owner<K>) -> CcmapResult<Option<Arc<V>>> {
        if self.key_strength != KeyStrength::Weak {
            return Err(CcmapError::InvalidConfig(
                "remove_owned requires a Weak-keyed cache; use remove".into(),
            ));
        }
        let hash = self.hash_owner(owner);
        Ok(self.map.remove(hash, |g| Self::owner_matches(g, owner)))
    }
}
