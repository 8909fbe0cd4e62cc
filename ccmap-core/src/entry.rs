//! # Entry
//!
//! Purpose: the bucket-chain node. A ten-way variant matrix selected by
//! (key strength) x (expires?) x (evicts-by-size?) collapses to one
//! generic entry struct parameterized by enabled-link-fields: a single
//! generic struct whose link fields are simply unused - and left at their
//! default `None` / sentinel value - when the owning map does not enable
//! that feature. See DESIGN.md for the tradeoff.
//!
//! Entries live in a per-segment arena (`Vec<Option<Entry<K, V>>>`)
//! addressed by index rather than through raw intrusive pointers, mirroring
//! the index-based node arena in the teacher engine's `ShardInner`. A
//! `generation` counter guards against acting on a stale reclamation
//! signal after a slot has been freed and reused.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::key_ref::KeyRef;
use crate::value_ref::ValueRef;

/// No expiration configured for this entry's map.
pub(crate) const NO_EXPIRATION: i64 = i64::MAX;

pub(crate) struct Entry<K, V> {
    pub key: KeyRef<K>,
    /// Full, post-spread hash.
    pub hash: u32,
    /// Immutable after publication: captured before `count` is written so
    /// concurrent readers see either the new chain or the old one.
    pub next_in_bucket: Option<usize>,
    pub value: ValueRef<V>,

    /// Access-order deque links. Meaningful only when the owning map
    /// enables size-bounded eviction or access-time expiration.
    pub access_prev: Option<usize>,
    pub access_next: Option<usize>,

    /// Write-order deque links. Meaningful only when the owning map
    /// enables write-time expiration.
    pub write_prev: Option<usize>,
    pub write_next: Option<usize>,

    /// Absolute expiration instant in clock nanoseconds, or
    /// `NO_EXPIRATION` when expiration is disabled or not yet set.
    ///
    /// An atomic, not a plain field: `Segment::get` refreshes it under only
    /// a *shared* read lock when `expire_after_access` is configured, so
    /// concurrent unlocked-relative-to-each-other readers may race to store
    /// it. Any one of their values winning is fine - this is the same
    /// casually-consistent spirit as the recency buffer.
    pub expiration_time: AtomicI64,

    /// Bumped every time this arena slot is freed and reused, so a
    /// reclamation signal captured before a slot was recycled is
    /// recognizably stale (see `crate::owner::ReclaimSignal`).
    pub generation: u64,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn fresh(key: KeyRef<K>, hash: u32, generation: u64) -> Self {
        Entry {
            key,
            hash,
            next_in_bucket: None,
            value: ValueRef::Unset,
            access_prev: None,
            access_next: None,
            write_prev: None,
            write_next: None,
            expiration_time: AtomicI64::new(NO_EXPIRATION),
            generation,
        }
    }

    pub(crate) fn set_expiration(&self, at: i64) {
        self.expiration_time.store(at, Ordering::Relaxed);
    }

    /// Signed subtraction so a one-time i64 overflow does not falsely
    /// expire entries.
    pub(crate) fn is_expired(&self, now: i64) -> bool {
        let expiration = self.expiration_time.load(Ordering::Relaxed);
        expiration != NO_EXPIRATION && now.wrapping_sub(expiration) > 0
    }
}
