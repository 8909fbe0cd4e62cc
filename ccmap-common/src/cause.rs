//! # Removal Cause
//!
//! Purpose: tag every entry delivered to the removal listener with the
//! reason it left the map.

/// Why an entry was removed from the map.
///
/// `is_evicting()` distinguishes causes the cache chose (size/expiration/
/// collection pressure) from causes a caller chose (`Explicit`, `Replaced`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// `remove(k)` / `clear()` called by a user.
    Explicit,
    /// `put(k, v2)` replaced a live `v1`.
    Replaced,
    /// The key or value reference was reclaimed (weak/soft collection).
    Collected,
    /// `expire_after_write`/`expire_after_access` elapsed.
    Expired,
    /// Size-bound eviction discarded the least-recently-used entry.
    Size,
    /// An entry expired while still in the `Loading` state.
    ///
    /// Spec §9 leaves it an open question whether this should be
    /// distinguished from `Expired` for listener dispatch; this crate
    /// treats them identically (`is_evicting` returns `true` for both) and
    /// records the distinct tag only for diagnostics.
    ExpiredOnLoad,
}

impl RemovalCause {
    /// True for causes the cache itself decided to apply, as opposed to
    /// ones a caller requested directly.
    pub fn is_evicting(self) -> bool {
        matches!(
            self,
            RemovalCause::Collected
                | RemovalCause::Expired
                | RemovalCause::Size
                | RemovalCause::ExpiredOnLoad
        )
    }
}
