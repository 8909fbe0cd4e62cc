//! # Loading (at-most-one-compute)
//!
//! Purpose: the rendezvous point concurrent `get_or_load` callers block on
//! while exactly one of them runs the loader.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use ccmap_common::CcmapError;

enum LoadState<V> {
    Pending,
    Success(Arc<V>),
    Failure(CcmapError),
}

/// A value-ref variant representing an in-flight computation.
///
/// `get()` (via `ValueRef::Loading`) always reports "not yet set";
/// `wait_for_value` is the only way to observe the eventual outcome.
/// At most one producer publishes into a given slot - enforced by
/// construction, not by a runtime check, since only the thread holding
/// the segment lock that installed the slot ever calls `publish_*`.
pub(crate) struct LoadingSlot<V> {
    state: Mutex<LoadState<V>>,
    cond: Condvar,
}

impl<V> LoadingSlot<V> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(LoadingSlot {
            state: Mutex::new(LoadState::Pending),
            cond: Condvar::new(),
        })
    }

    /// Blocks the calling thread until the producer publishes success or
    /// failure. No timeout: spec §5 says cancellation/timeouts are the
    /// caller's concern, layered outside this map.
    pub(crate) fn wait_for_value(&self) -> Result<Arc<V>, CcmapError> {
        let mut guard = self.state.lock();
        loop {
            match &*guard {
                LoadState::Pending => {
                    self.cond.wait(&mut guard);
                }
                LoadState::Success(v) => return Ok(Arc::clone(v)),
                LoadState::Failure(e) => return Err(e.clone()),
            }
        }
    }

    pub(crate) fn publish_success(&self, value: Arc<V>) {
        let mut guard = self.state.lock();
        *guard = LoadState::Success(value);
        self.cond.notify_all();
    }

    pub(crate) fn publish_failure(&self, err: CcmapError) {
        let mut guard = self.state.lock();
        *guard = LoadState::Failure(err);
        self.cond.notify_all();
    }
}

/// Times a loader invocation for the stats collaborator (spec §4.7 step
/// 4: "Time it (for the stats collaborator)"). Generic over the loader's
/// return type so it serves both the fallible and infallible call sites
/// without caring whether `null`/`None` is a possible outcome.
pub(crate) fn time_loader<K, R>(loader: &dyn Fn(&K) -> R, key: &K) -> (R, Duration) {
    let start = std::time::Instant::now();
    let result = loader(key);
    (result, start.elapsed())
}
